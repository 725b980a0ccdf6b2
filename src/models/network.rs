use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coarse connection quality, as judged from probe latency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Offline,
}

impl NetworkQuality {
    /// Classify a round-trip latency in milliseconds.
    pub fn from_latency_ms(latency_ms: u64) -> Self {
        match latency_ms {
            0..=150 => NetworkQuality::Excellent,
            151..=400 => NetworkQuality::Good,
            401..=1000 => NetworkQuality::Fair,
            _ => NetworkQuality::Poor,
        }
    }

    pub fn upload_recommended(self) -> bool {
        matches!(
            self,
            NetworkQuality::Excellent | NetworkQuality::Good | NetworkQuality::Fair
        )
    }

    /// Factor applied to the base per-request timeout.
    pub fn timeout_multiplier(self) -> f64 {
        match self {
            NetworkQuality::Excellent | NetworkQuality::Good => 1.0,
            NetworkQuality::Fair => 1.5,
            NetworkQuality::Poor => 2.5,
            NetworkQuality::Offline => 3.0,
        }
    }
}
