use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use garde::Validate;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::UploadError;
use crate::models::upload::{SignedUrl, UploadMetadata, UploadedPhoto, MAX_UPLOAD_BYTES};
use crate::services::network::NetworkMonitor;
use crate::services::retry::{with_retry, RetryPolicy, Transient};

/// Something that can move compressed bytes into object storage.
#[async_trait]
pub trait PhotoUploader: Send + Sync {
    async fn upload(
        &self,
        bytes: &[u8],
        endpoint: &str,
        metadata: &UploadMetadata,
    ) -> Result<UploadedPhoto, UploadError>;
}

/// Backend records that point at uploaded photos.
#[async_trait]
pub trait RecordClient: Send + Sync {
    /// POST a metadata record for uploaded photos.
    async fn register_metadata(&self, path: &str, body: &Value) -> Result<(), UploadError>;

    /// PATCH a parent record (e.g. a horse) to reference a new photo.
    async fn update_record(&self, path: &str, body: &Value) -> Result<(), UploadError>;
}

/// Client for the backend's signed-URL endpoints and the storage PUT target.
pub struct SignedUrlClient {
    http: Client,
    api_base_url: String,
    api_token: Option<String>,
    base_timeout: Duration,
    retry: RetryPolicy,
    network: Arc<dyn NetworkMonitor>,
}

/// Outcome of a single storage PUT.
#[derive(Debug, thiserror::Error)]
enum PutError {
    #[error("PUT timed out: {0}")]
    Timeout(String),

    #[error("Network connection lost: {0}")]
    Connection(String),

    #[error("Storage rejected upload with status {0}")]
    Status(StatusCode),

    #[error("PUT request failed: {0}")]
    Request(String),
}

impl Transient for PutError {
    fn is_transient(&self) -> bool {
        matches!(self, PutError::Timeout(_) | PutError::Connection(_))
    }
}

impl From<reqwest::Error> for PutError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PutError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            PutError::Connection(e.to_string())
        } else {
            PutError::Request(e.to_string())
        }
    }
}

impl SignedUrlClient {
    pub fn new(
        api_base_url: impl Into<String>,
        api_token: Option<String>,
        base_timeout: Duration,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            api_token,
            base_timeout,
            retry: RetryPolicy::default(),
            network,
        }
    }

    /// Override the inline PUT retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the backend for a signed write URL and matching read URL.
    pub async fn request_signed_url(
        &self,
        endpoint: &str,
        metadata: &UploadMetadata,
    ) -> Result<SignedUrl, UploadError> {
        let response = self
            .api_request(Method::POST, endpoint)
            .json(metadata)
            .send()
            .await
            .map_err(|e| UploadError::UploadFailed(format!("signed URL request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::UploadFailed(format!(
                "signed URL request returned {}",
                status
            )));
        }

        response
            .json::<SignedUrl>()
            .await
            .map_err(|e| UploadError::UploadFailed(format!("invalid signed URL response: {}", e)))
    }

    /// PUT bytes to a signed URL, retrying timeouts and dropped connections.
    /// Returns the number of retries that were needed.
    pub async fn put_with_retry(&self, upload_url: &str, bytes: &[u8]) -> Result<u32, UploadError> {
        let outcome = with_retry(&self.retry, || self.put_once(upload_url, bytes))
            .await
            .map_err(|e| UploadError::UploadFailed(e.to_string()))?;
        Ok(outcome.retries)
    }

    async fn put_once(&self, upload_url: &str, bytes: &[u8]) -> Result<(), PutError> {
        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, "image/jpeg")
            .header(CONTENT_LENGTH, bytes.len())
            .timeout(self.request_timeout())
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PutError::Status(status));
        }
        Ok(())
    }

    async fn send_json(&self, method: Method, path: &str, body: &Value) -> Result<(), String> {
        let response = self
            .api_request(method, path)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned {}", path, status));
        }
        Ok(())
    }

    fn api_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
        };

        let builder = self.http.request(method, url).timeout(self.request_timeout());
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn request_timeout(&self) -> Duration {
        self.base_timeout
            .mul_f64(self.network.current().timeout_multiplier())
    }
}

#[async_trait]
impl PhotoUploader for SignedUrlClient {
    async fn upload(
        &self,
        bytes: &[u8],
        endpoint: &str,
        metadata: &UploadMetadata,
    ) -> Result<UploadedPhoto, UploadError> {
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(UploadError::ImageTooLarge {
                size: bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        metadata
            .validate()
            .map_err(|e| UploadError::MetadataCreationFailed(e.to_string()))?;

        let signed = self.request_signed_url(endpoint, metadata).await?;
        tracing::debug!(storage_path = %signed.storage_path, "Obtained signed upload URL");

        let retries = match self.put_with_retry(&signed.upload_url, bytes).await {
            Ok(retries) => retries,
            Err(e) => {
                metrics::counter!("photo_uploads_failed_total").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("photo_uploads_total").increment(1);
        tracing::info!(
            storage_path = %signed.storage_path,
            bytes = bytes.len(),
            retries,
            "Photo uploaded"
        );

        Ok(UploadedPhoto {
            read_url: signed.read_url,
            storage_path: signed.storage_path,
            bytes: bytes.len(),
            retries,
        })
    }
}

#[async_trait]
impl RecordClient for SignedUrlClient {
    async fn register_metadata(&self, path: &str, body: &Value) -> Result<(), UploadError> {
        self.send_json(Method::POST, path, body)
            .await
            .map_err(UploadError::MetadataCreationFailed)
    }

    async fn update_record(&self, path: &str, body: &Value) -> Result<(), UploadError> {
        self.send_json(Method::PATCH, path, body)
            .await
            .map_err(UploadError::DependentUpdateFailed)
    }
}
