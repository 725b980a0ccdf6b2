use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::models::network::NetworkQuality;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the "is it a good time to upload" signal.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Last known quality, without touching the network.
    fn current(&self) -> NetworkQuality;

    /// Re-assess the connection and return the new quality.
    async fn refresh(&self) -> NetworkQuality {
        self.current()
    }
}

/// Fixed quality, settable at runtime. Used when no probe URL is configured.
pub struct StaticNetwork {
    quality: RwLock<NetworkQuality>,
}

impl StaticNetwork {
    pub fn new(quality: NetworkQuality) -> Self {
        Self {
            quality: RwLock::new(quality),
        }
    }

    pub fn set(&self, quality: NetworkQuality) {
        if let Ok(mut guard) = self.quality.write() {
            *guard = quality;
        }
    }
}

#[async_trait]
impl NetworkMonitor for StaticNetwork {
    fn current(&self) -> NetworkQuality {
        self.quality
            .read()
            .map(|q| *q)
            .unwrap_or(NetworkQuality::Offline)
    }
}

/// Judges quality from the round-trip time of a lightweight GET.
pub struct LatencyProbe {
    http: Client,
    probe_url: String,
    last: RwLock<NetworkQuality>,
}

impl LatencyProbe {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            probe_url: probe_url.into(),
            last: RwLock::new(NetworkQuality::Good),
        }
    }
}

#[async_trait]
impl NetworkMonitor for LatencyProbe {
    fn current(&self) -> NetworkQuality {
        self.last
            .read()
            .map(|q| *q)
            .unwrap_or(NetworkQuality::Offline)
    }

    async fn refresh(&self) -> NetworkQuality {
        let start = Instant::now();
        let result = self
            .http
            .get(&self.probe_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        let quality = match result {
            Ok(response) if response.status().is_success() => {
                NetworkQuality::from_latency_ms(start.elapsed().as_millis() as u64)
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Network probe returned error status");
                NetworkQuality::Poor
            }
            Err(e) => {
                tracing::debug!(error = %e, "Network probe failed");
                NetworkQuality::Offline
            }
        };

        if let Ok(mut guard) = self.last.write() {
            *guard = quality;
        }
        tracing::trace!(quality = %quality, "Network quality refreshed");
        quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_network_can_be_changed() {
        let network = StaticNetwork::new(NetworkQuality::Good);
        assert_eq!(network.refresh().await, NetworkQuality::Good);
        network.set(NetworkQuality::Offline);
        assert_eq!(network.current(), NetworkQuality::Offline);
    }

    #[tokio::test]
    async fn test_probe_success_is_uploadable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/health").with_status(200).create_async().await;

        let probe = LatencyProbe::new(format!("{}/health", server.url()));
        let quality = probe.refresh().await;

        mock.assert_async().await;
        assert!(quality.upload_recommended());
        assert_eq!(probe.current(), quality);
    }

    #[tokio::test]
    async fn test_probe_error_status_defers_uploads() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(503).create_async().await;

        let probe = LatencyProbe::new(format!("{}/health", server.url()));
        assert_eq!(probe.refresh().await, NetworkQuality::Poor);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_offline() {
        let probe = LatencyProbe::new("http://127.0.0.1:9/health");
        assert_eq!(probe.refresh().await, NetworkQuality::Offline);
    }
}
