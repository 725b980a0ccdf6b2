use std::time::Duration;

use serde::Deserialize;

use crate::services::store::StoreKind;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Backend base URL that signed-URL and record paths are resolved against
    pub api_base_url: String,

    /// Bearer token for backend requests
    #[serde(default)]
    pub api_token: Option<String>,

    /// Where the upload queue is persisted: "file", "redis" or "memory"
    #[serde(default)]
    pub queue_store: StoreKind,

    /// Directory for the file-backed queue
    #[serde(default = "default_queue_dir")]
    pub queue_dir: String,

    /// Redis connection string, required when `queue_store` is "redis"
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key the serialized queue is stored under
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Seconds between queue checks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Pause between queued items during a drain, in milliseconds
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,

    /// Base per-request timeout, scaled by network quality
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// URL probed to judge network quality. Without it, the network is assumed good.
    #[serde(default)]
    pub network_probe_url: Option<String>,

    /// Prometheus exporter listen address (e.g., "0.0.0.0:9090")
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_queue_dir() -> String {
    ".upload-queue".to_string()
}

fn default_queue_key() -> String {
    crate::services::queue::DEFAULT_QUEUE_KEY.to_string()
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_item_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
