use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Background attempts allowed before a queued upload is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Hard ceiling on a compressed payload (5 MB).
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Compression settings for the two upload contexts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompressionPreset {
    /// General photos (horse profile pictures and the like).
    Photo,
    /// Routine step evidence, kept small for slow stable connections.
    #[default]
    Evidence,
}

impl CompressionPreset {
    pub fn max_dimension(self) -> u32 {
        match self {
            CompressionPreset::Photo => 1200,
            CompressionPreset::Evidence => 800,
        }
    }

    pub fn quality(self) -> f32 {
        match self {
            CompressionPreset::Photo => 0.75,
            CompressionPreset::Evidence => 0.65,
        }
    }

    /// Soft size target; the compressor steps quality down to reach it.
    pub fn target_bytes(self) -> Option<usize> {
        match self {
            CompressionPreset::Photo => None,
            CompressionPreset::Evidence => Some(200 * 1024),
        }
    }
}

/// File metadata sent when requesting a signed URL.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[garde(length(min = 1, max = 128))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub horse_id: Option<String>,

    #[garde(length(min = 1, max = 128))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instance_id: Option<String>,

    #[garde(length(min = 1, max = 128))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub step_id: Option<String>,

    #[garde(length(min = 1, max = 255))]
    pub file_name: String,

    #[garde(prefix("image/"))]
    pub mime_type: String,
}

impl UploadMetadata {
    /// Metadata for a JPEG with a generated file name.
    pub fn jpeg(prefix: &str) -> Self {
        Self {
            horse_id: None,
            instance_id: None,
            step_id: None,
            file_name: format!("{}_{}.jpg", prefix, Uuid::new_v4()),
            mime_type: "image/jpeg".to_string(),
        }
    }
}

/// Response from a signed-URL issuing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub upload_url: String,
    pub read_url: String,
    pub storage_path: String,
}

/// A photo that reached object storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub read_url: String,
    pub storage_path: String,
    #[serde(skip)]
    pub bytes: usize,
    /// Inline PUT retries spent on this upload.
    #[serde(skip)]
    pub retries: u32,
}

/// One pending background upload, persisted in the upload queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedUpload {
    pub id: Uuid,
    #[serde(with = "base64_bytes")]
    pub image_bytes: Vec<u8>,
    pub endpoint: String,
    pub request_body: UploadMetadata,
    #[serde(default)]
    pub preset: CompressionPreset,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedUpload {
    pub fn new(
        image_bytes: Vec<u8>,
        endpoint: impl Into<String>,
        request_body: UploadMetadata,
        preset: CompressionPreset,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_bytes,
            endpoint: endpoint.into(),
            request_body,
            preset,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: MAX_RETRIES,
        }
    }

    /// Whether another failed attempt may still be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
