use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::error::UploadError;
use crate::models::upload::{CompressionPreset, QueuedUpload, UploadMetadata, UploadedPhoto};
use crate::services::compression::compress_off_thread;
use crate::services::queue::UploadQueue;
use crate::services::upload::{PhotoUploader, RecordClient};

/// Parallel evidence uploads per batch.
pub const EVIDENCE_UPLOAD_CONCURRENCY: usize = 4;

/// Result of a step evidence batch.
#[derive(Debug, Default)]
pub struct EvidenceBatch {
    pub uploaded: Vec<UploadedPhoto>,
    pub failed: usize,
    /// Failures handed to the background queue.
    pub queued: usize,
}

enum EvidenceOutcome {
    Uploaded(UploadedPhoto),
    Retryable(QueuedUpload),
    Failed,
}

/// Foreground photo flows used by the clients.
pub struct PhotoService {
    uploader: Arc<dyn PhotoUploader>,
    records: Arc<dyn RecordClient>,
    queue: Arc<UploadQueue>,
    concurrency: usize,
}

impl PhotoService {
    pub fn new(
        uploader: Arc<dyn PhotoUploader>,
        records: Arc<dyn RecordClient>,
        queue: Arc<UploadQueue>,
    ) -> Self {
        Self {
            uploader,
            records,
            queue,
            concurrency: EVIDENCE_UPLOAD_CONCURRENCY,
        }
    }

    /// Compress and upload a horse's profile photo, then point the horse at it.
    pub async fn upload_horse_photo(
        &self,
        horse_id: &str,
        image: Vec<u8>,
    ) -> Result<UploadedPhoto, UploadError> {
        let compressed = compress_off_thread(image, CompressionPreset::Photo).await?;

        let mut metadata = UploadMetadata::jpeg("horse");
        metadata.horse_id = Some(horse_id.to_string());

        let endpoint = format!("/horses/{}/photo/upload-url", horse_id);
        let photo = self
            .uploader
            .upload(&compressed.bytes, &endpoint, &metadata)
            .await?;

        self.records
            .update_record(
                &format!("/horses/{}", horse_id),
                &json!({
                    "photoUrl": photo.read_url,
                    "photoPath": photo.storage_path,
                }),
            )
            .await?;

        tracing::info!(horse_id, storage_path = %photo.storage_path, "Horse photo updated");
        Ok(photo)
    }

    /// Upload evidence photos for a routine step.
    ///
    /// Uploads fan out with bounded concurrency. Each upload that still fails
    /// after inline retries is queued on its own for background retry; the
    /// batch as a whole does not fail because of it. Successful uploads are
    /// registered with the step in one request.
    pub async fn upload_step_evidence(
        &self,
        instance_id: &str,
        step_id: &str,
        horse_id: Option<&str>,
        images: Vec<Vec<u8>>,
    ) -> Result<EvidenceBatch, UploadError> {
        let endpoint = format!(
            "/routines/instances/{}/steps/{}/evidence/upload-url",
            instance_id, step_id
        );
        let endpoint = endpoint.as_str();

        let outcomes: Vec<EvidenceOutcome> = stream::iter(images)
            .map(|image| async move {
                let compressed = match compress_off_thread(image, CompressionPreset::Evidence).await {
                    Ok(compressed) => compressed,
                    Err(e) => {
                        tracing::warn!(instance_id, step_id, error = %e, "Evidence photo could not be compressed");
                        return EvidenceOutcome::Failed;
                    }
                };

                let metadata = UploadMetadata {
                    horse_id: horse_id.map(str::to_string),
                    instance_id: Some(instance_id.to_string()),
                    step_id: Some(step_id.to_string()),
                    ..UploadMetadata::jpeg("evidence")
                };

                let result = self.uploader.upload(&compressed.bytes, endpoint, &metadata).await;
                match result {
                    Ok(photo) => EvidenceOutcome::Uploaded(photo),
                    Err(e @ UploadError::UploadFailed(_)) => {
                        tracing::warn!(instance_id, step_id, error = %e, "Evidence upload failed, queueing");
                        EvidenceOutcome::Retryable(QueuedUpload::new(
                            compressed.bytes,
                            endpoint,
                            metadata,
                            CompressionPreset::Evidence,
                        ))
                    }
                    Err(e) => {
                        tracing::warn!(instance_id, step_id, error = %e, "Evidence upload failed");
                        EvidenceOutcome::Failed
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut batch = EvidenceBatch::default();
        for outcome in outcomes {
            match outcome {
                EvidenceOutcome::Uploaded(photo) => batch.uploaded.push(photo),
                EvidenceOutcome::Retryable(pending) => {
                    batch.failed += 1;
                    match self.queue.enqueue(pending).await {
                        Ok(_) => batch.queued += 1,
                        Err(e) => tracing::error!(error = %e, "Failed to persist queued upload"),
                    }
                }
                EvidenceOutcome::Failed => batch.failed += 1,
            }
        }

        if !batch.uploaded.is_empty() {
            self.records
                .register_metadata(
                    &format!("/routines/instances/{}/steps/{}/evidence", instance_id, step_id),
                    &json!({ "photos": batch.uploaded }),
                )
                .await?;
        }

        tracing::info!(
            instance_id,
            step_id,
            uploaded = batch.uploaded.len(),
            failed = batch.failed,
            queued = batch.queued,
            "Evidence batch finished"
        );
        Ok(batch)
    }
}
