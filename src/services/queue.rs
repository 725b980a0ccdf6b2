use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::upload::QueuedUpload;
use crate::services::store::KeyValueStore;

pub const DEFAULT_QUEUE_KEY: &str = "pendingImageUploads";

/// Ordered, persisted list of uploads awaiting background retry.
///
/// All access goes through one async mutex, and the whole list is written back
/// to the store after every mutation while that lock is held. A mutation only
/// reaches memory once the store has accepted it, so a failed write leaves
/// both sides as they were. Queue sizes are single-digit in practice, so the
/// O(n) rewrite is acceptable.
pub struct UploadQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    items: Mutex<Vec<QueuedUpload>>,
}

impl UploadQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            items: Mutex::new(Vec::new()),
        }
    }

    /// Create a queue and load whatever the store already holds.
    pub async fn open(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Result<Self, QueueError> {
        let queue = Self::new(store, key);
        queue.load().await?;
        Ok(queue)
    }

    /// Replace in-memory state with the persisted list. Returns the item count.
    ///
    /// Data that no longer decodes is discarded with a warning.
    pub async fn load(&self) -> Result<usize, QueueError> {
        let stored = self.store.load(&self.key).await?;
        let loaded = match stored {
            Some(json) => match serde_json::from_str::<Vec<QueuedUpload>>(&json) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Discarding undecodable upload queue");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut items = self.items.lock().await;
        *items = loaded;
        metrics::gauge!("upload_queue_depth").set(items.len() as f64);
        tracing::info!(key = %self.key, pending = items.len(), "Loaded upload queue");
        Ok(items.len())
    }

    /// Write the current list to the store.
    pub async fn save(&self) -> Result<(), QueueError> {
        let items = self.items.lock().await;
        self.persist(&items).await
    }

    /// Append a failed upload to the back of the queue.
    pub async fn enqueue(&self, upload: QueuedUpload) -> Result<Uuid, QueueError> {
        let id = upload.id;
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        next.push(upload);
        self.commit(&mut items, next).await?;

        metrics::counter!("upload_queue_enqueued_total").increment(1);
        tracing::info!(upload_id = %id, pending = items.len(), "Queued upload for background retry");
        Ok(id)
    }

    /// Remove the given ids. Returns how many were actually present.
    pub async fn dequeue_successful(&self, ids: &[Uuid]) -> Result<usize, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut items = self.items.lock().await;
        let next: Vec<QueuedUpload> = items
            .iter()
            .filter(|item| !ids.contains(&item.id))
            .cloned()
            .collect();
        let removed = items.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(&mut items, next).await?;
        Ok(removed)
    }

    /// Record one more failed attempt. Returns the new count, or `None` if the
    /// id is not queued. The count never exceeds the item's `max_retries`.
    pub async fn bump_retry(&self, id: Uuid) -> Result<Option<u32>, QueueError> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        let Some(item) = next.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };

        item.retry_count = item.retry_count.saturating_add(1).min(item.max_retries);
        let count = item.retry_count;
        self.commit(&mut items, next).await?;
        Ok(Some(count))
    }

    /// Copy of the queued items, front first.
    pub async fn snapshot(&self) -> Vec<QueuedUpload> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Persist `next` and only then make it the live list.
    async fn commit(
        &self,
        items: &mut Vec<QueuedUpload>,
        next: Vec<QueuedUpload>,
    ) -> Result<(), QueueError> {
        self.persist(&next).await?;
        *items = next;
        Ok(())
    }

    async fn persist(&self, items: &[QueuedUpload]) -> Result<(), QueueError> {
        let payload = serde_json::to_string(items).map_err(QueueError::Serialize)?;
        self.store.save(&self.key, &payload).await?;
        metrics::gauge!("upload_queue_depth").set(items.len() as f64);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue file error: {0}")]
    Io(#[from] std::io::Error),
}
