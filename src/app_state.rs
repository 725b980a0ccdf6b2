use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::network::NetworkQuality;
use crate::services::{
    network::{LatencyProbe, NetworkMonitor, StaticNetwork},
    photos::PhotoService,
    processor::QueueProcessor,
    queue::{QueueError, UploadQueue},
    store::{FileStore, KeyValueStore, MemoryStore, RedisStore, StoreKind},
    upload::SignedUrlClient,
};

/// Process-wide services, wired once and handed to whoever needs them.
#[derive(Clone)]
pub struct AppState {
    pub network: Arc<dyn NetworkMonitor>,
    pub client: Arc<SignedUrlClient>,
    pub queue: Arc<UploadQueue>,
    pub photos: Arc<PhotoService>,
    pub processor: Arc<QueueProcessor>,
}

impl AppState {
    /// Wire services from configuration and load the persisted queue.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StateError> {
        let store: Arc<dyn KeyValueStore> = match config.queue_store {
            StoreKind::File => Arc::new(FileStore::new(&config.queue_dir)),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or(StateError::MissingRedisUrl)?;
                let redis = RedisStore::new(url)?;
                redis.health_check().await?;
                Arc::new(redis)
            }
        };

        let network: Arc<dyn NetworkMonitor> = match &config.network_probe_url {
            Some(url) => Arc::new(LatencyProbe::new(url.clone())),
            None => Arc::new(StaticNetwork::new(NetworkQuality::Good)),
        };

        let queue = UploadQueue::open(store, config.queue_key.clone()).await?;

        let client = SignedUrlClient::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.request_timeout(),
            network.clone(),
        );

        let pending = queue.len().await;
        tracing::info!(
            store = %config.queue_store,
            pending,
            "Upload services initialized"
        );

        Ok(Self::new(
            network,
            client,
            queue,
            config.check_interval(),
            config.item_delay(),
        ))
    }

    pub fn new(
        network: Arc<dyn NetworkMonitor>,
        client: SignedUrlClient,
        queue: UploadQueue,
        check_interval: Duration,
        item_delay: Duration,
    ) -> Self {
        let client = Arc::new(client);
        let queue = Arc::new(queue);
        let photos = PhotoService::new(client.clone(), client.clone(), queue.clone());
        let processor = QueueProcessor::new(queue.clone(), client.clone(), network.clone())
            .with_intervals(check_interval, item_delay);

        Self {
            network,
            client,
            queue,
            photos: Arc::new(photos),
            processor: Arc::new(processor),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("QUEUE_STORE=redis requires REDIS_URL")]
    MissingRedisUrl,

    #[error("Upload queue unavailable: {0}")]
    Queue(#[from] QueueError),
}
