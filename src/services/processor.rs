use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, sleep, MissedTickBehavior};
use uuid::Uuid;

use crate::error::UploadError;
use crate::models::upload::{QueuedUpload, UploadedPhoto};
use crate::services::compression::compress_off_thread;
use crate::services::network::NetworkMonitor;
use crate::services::queue::UploadQueue;
use crate::services::upload::PhotoUploader;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_secs(1);
/// Shortest period `run` will tick at.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// An upload given up on after exhausting its retries.
#[derive(Debug, Clone)]
pub struct DroppedUpload {
    pub id: Uuid,
    pub endpoint: String,
    pub retry_count: u32,
    pub error: String,
}

/// What a single pass over the queue did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: Vec<Uuid>,
    pub retried: Vec<Uuid>,
    pub dropped: Vec<DroppedUpload>,
}

/// Periodically drains the upload queue when the network allows it.
///
/// Drains are sequential and never overlap; a drain requested while another is
/// running returns `None` straight away.
pub struct QueueProcessor {
    queue: Arc<UploadQueue>,
    uploader: Arc<dyn PhotoUploader>,
    network: Arc<dyn NetworkMonitor>,
    check_interval: Duration,
    item_delay: Duration,
    processing: AtomicBool,
}

/// Clears the processing flag when a drain ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<UploadQueue>,
        uploader: Arc<dyn PhotoUploader>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        Self {
            queue,
            uploader,
            network,
            check_interval: DEFAULT_CHECK_INTERVAL,
            item_delay: DEFAULT_ITEM_DELAY,
            processing: AtomicBool::new(false),
        }
    }

    /// Override the check period and the pause between items. The check
    /// period is raised to `MIN_CHECK_INTERVAL` if shorter.
    pub fn with_intervals(mut self, check_interval: Duration, item_delay: Duration) -> Self {
        if check_interval < MIN_CHECK_INTERVAL {
            tracing::warn!(
                requested_ms = check_interval.as_millis() as u64,
                "Check interval too short, using minimum"
            );
        }
        self.check_interval = check_interval.max(MIN_CHECK_INTERVAL);
        self.item_delay = item_delay;
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Check the queue on every interval for the lifetime of the process.
    pub async fn run(&self) {
        tracing::info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Upload queue monitor started"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Some(report) = self.tick().await {
                tracing::debug!(
                    attempted = report.attempted,
                    succeeded = report.succeeded.len(),
                    "Queue check drained items"
                );
            }
        }
    }

    /// One periodic check: drain if there is work, no drain is running and
    /// the network is good enough.
    pub async fn tick(&self) -> Option<DrainReport> {
        if self.queue.is_empty().await || self.is_processing() {
            return None;
        }

        let quality = self.network.refresh().await;
        if !quality.upload_recommended() {
            tracing::debug!(quality = %quality, "Deferring queued uploads until network improves");
            return None;
        }

        self.drain().await
    }

    /// Attempt every queued upload once, front to back.
    ///
    /// A failing item never stops the pass. Failed items with retries left
    /// have their count bumped; the rest are dropped. The queue is updated
    /// once the whole pass is done.
    pub async fn drain(&self) -> Option<DrainReport> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress");
            return None;
        }
        let _guard = ProcessingGuard(&self.processing);

        let started = Instant::now();
        let items = self.queue.snapshot().await;
        let mut report = DrainReport {
            attempted: items.len(),
            ..Default::default()
        };

        tracing::info!(pending = items.len(), "Processing queued uploads");

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.item_delay.is_zero() {
                sleep(self.item_delay).await;
            }

            match self.replay(item).await {
                Ok(photo) => {
                    tracing::info!(
                        upload_id = %item.id,
                        storage_path = %photo.storage_path,
                        retry_count = item.retry_count,
                        "Queued upload succeeded"
                    );
                    report.succeeded.push(item.id);
                }
                Err(e) if item.can_retry() => {
                    tracing::warn!(
                        upload_id = %item.id,
                        retry_count = item.retry_count + 1,
                        max_retries = item.max_retries,
                        error = %e,
                        "Queued upload failed, will retry"
                    );
                    report.retried.push(item.id);
                }
                Err(e) => {
                    tracing::warn!(
                        upload_id = %item.id,
                        endpoint = %item.endpoint,
                        retry_count = item.retry_count,
                        error = %e,
                        "Dropping queued upload after max retries"
                    );
                    metrics::counter!("upload_queue_dropped_total").increment(1);
                    report.dropped.push(DroppedUpload {
                        id: item.id,
                        endpoint: item.endpoint.clone(),
                        retry_count: item.retry_count,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.settle(&report).await;

        metrics::histogram!("upload_queue_drain_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            succeeded = report.succeeded.len(),
            retried = report.retried.len(),
            dropped = report.dropped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upload queue pass complete"
        );

        Some(report)
    }

    /// Decode the stored payload, recompress it and upload again.
    ///
    /// Only the storage upload is repeated. A recovered evidence photo is not
    /// registered with its step afterwards, so it sits in storage until
    /// something links it.
    async fn replay(&self, item: &QueuedUpload) -> Result<UploadedPhoto, UploadError> {
        let compressed = compress_off_thread(item.image_bytes.clone(), item.preset).await?;
        self.uploader
            .upload(&compressed.bytes, &item.endpoint, &item.request_body)
            .await
    }

    async fn settle(&self, report: &DrainReport) {
        let finished: Vec<Uuid> = report
            .succeeded
            .iter()
            .copied()
            .chain(report.dropped.iter().map(|d| d.id))
            .collect();

        if let Err(e) = self.queue.dequeue_successful(&finished).await {
            tracing::error!(error = %e, "Failed to persist upload queue after drain");
        }

        for id in &report.retried {
            if let Err(e) = self.queue.bump_retry(*id).await {
                tracing::error!(upload_id = %id, error = %e, "Failed to persist retry count");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::NetworkQuality;
    use crate::models::upload::{CompressionPreset, UploadMetadata, MAX_RETRIES};
    use crate::services::network::StaticNetwork;
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::HashSet;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    /// Fails uploads whose file name is in `failing`.
    struct FakeUploader {
        failing: HashSet<String>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl FakeUploader {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PhotoUploader for FakeUploader {
        async fn upload(
            &self,
            bytes: &[u8],
            _endpoint: &str,
            metadata: &UploadMetadata,
        ) -> Result<UploadedPhoto, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            if self.failing.contains(&metadata.file_name) {
                return Err(UploadError::UploadFailed("storage unavailable".to_string()));
            }
            Ok(UploadedPhoto {
                read_url: format!("https://cdn.example.com/{}", metadata.file_name),
                storage_path: metadata.file_name.clone(),
                bytes: bytes.len(),
                retries: 0,
            })
        }
    }

    fn jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8 * 4, y as u8 * 4, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn queued(name: &str, retry_count: u32) -> QueuedUpload {
        let mut metadata = UploadMetadata::jpeg("evidence");
        metadata.file_name = name.to_string();
        let mut upload = QueuedUpload::new(
            jpeg(),
            "/routines/instances/i1/steps/s1/evidence/upload-url",
            metadata,
            CompressionPreset::Evidence,
        );
        upload.retry_count = retry_count;
        upload
    }

    fn processor(
        queue: Arc<UploadQueue>,
        uploader: Arc<FakeUploader>,
        quality: NetworkQuality,
    ) -> QueueProcessor {
        QueueProcessor::new(queue, uploader, Arc::new(StaticNetwork::new(quality)))
            .with_intervals(Duration::from_millis(10), Duration::ZERO)
    }

    fn new_queue() -> Arc<UploadQueue> {
        Arc::new(UploadQueue::new(Arc::new(MemoryStore::new()), "test"))
    }

    #[tokio::test]
    async fn test_exhausted_item_is_dropped_not_requeued() {
        let queue = new_queue();
        queue.enqueue(queued("last-chance.jpg", MAX_RETRIES)).await.unwrap();
        let uploader = Arc::new(FakeUploader::new(&["last-chance.jpg"]));

        let report = processor(queue.clone(), uploader, NetworkQuality::Good)
            .drain()
            .await
            .unwrap();

        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].retry_count, MAX_RETRIES);
        assert!(report.retried.is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_one_permanent_failure_among_five() {
        let queue = new_queue();
        for n in 1..=5 {
            let retries = if n == 3 { MAX_RETRIES } else { 0 };
            queue.enqueue(queued(&format!("photo-{}.jpg", n), retries)).await.unwrap();
        }
        let uploader = Arc::new(FakeUploader::new(&["photo-3.jpg"]));

        let report = processor(queue.clone(), uploader.clone(), NetworkQuality::Good)
            .drain()
            .await
            .unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded.len(), 4);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 5);
        assert_eq!(queue.len().await, 0);

        logs_assert(|lines: &[&str]| {
            let drops = lines
                .iter()
                .filter(|line| line.contains("Dropping queued upload after max retries"))
                .count();
            match drops {
                1 => Ok(()),
                n => Err(format!("expected one drop event, saw {}", n)),
            }
        });
    }

    #[tokio::test]
    async fn test_failure_with_retries_left_bumps_count_in_place() {
        let queue = new_queue();
        queue.enqueue(queued("a.jpg", 0)).await.unwrap();
        let flaky = queue.enqueue(queued("b.jpg", 1)).await.unwrap();
        queue.enqueue(queued("c.jpg", 0)).await.unwrap();
        let uploader = Arc::new(FakeUploader::new(&["b.jpg"]));

        let report = processor(queue.clone(), uploader, NetworkQuality::Good)
            .drain()
            .await
            .unwrap();

        assert_eq!(report.retried, vec![flaky]);
        let remaining = queue.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, flaky);
        assert_eq!(remaining[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_undecodable_payload_counts_as_failure() {
        let queue = new_queue();
        let mut broken = queued("broken.jpg", 0);
        broken.image_bytes = b"garbage".to_vec();
        let id = queue.enqueue(broken).await.unwrap();
        let uploader = Arc::new(FakeUploader::new(&[]));

        let report = processor(queue.clone(), uploader.clone(), NetworkQuality::Good)
            .drain()
            .await
            .unwrap();

        assert_eq!(report.retried, vec![id]);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_rejected() {
        let queue = new_queue();
        queue.enqueue(queued("slow.jpg", 0)).await.unwrap();
        let mut slow = FakeUploader::new(&[]);
        slow.latency = Duration::from_millis(200);
        let processor = processor(queue, Arc::new(slow), NetworkQuality::Good);

        let (first, second) = tokio::join!(processor.drain(), async {
            sleep(Duration::from_millis(50)).await;
            processor.drain().await
        });

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(!processor.is_processing());
    }

    #[tokio::test]
    async fn test_tick_waits_for_good_network() {
        let queue = new_queue();
        queue.enqueue(queued("a.jpg", 0)).await.unwrap();
        let uploader = Arc::new(FakeUploader::new(&[]));
        let network = Arc::new(StaticNetwork::new(NetworkQuality::Poor));
        let processor = QueueProcessor::new(queue.clone(), uploader.clone(), network.clone())
            .with_intervals(Duration::from_millis(10), Duration::ZERO);

        assert!(processor.tick().await.is_none());
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);

        network.set(NetworkQuality::Good);
        let report = processor.tick().await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_tick_skips_empty_queue() {
        let uploader = Arc::new(FakeUploader::new(&[]));
        let processor = processor(new_queue(), uploader, NetworkQuality::Excellent);
        assert!(processor.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_items_enqueued_during_drain_survive() {
        let queue = new_queue();
        queue.enqueue(queued("first.jpg", 0)).await.unwrap();
        let mut slow = FakeUploader::new(&[]);
        slow.latency = Duration::from_millis(100);
        let processor = processor(queue.clone(), Arc::new(slow), NetworkQuality::Good);

        let late = queued("late.jpg", 0);
        let late_id = late.id;
        let (report, _) = tokio::join!(processor.drain(), async {
            sleep(Duration::from_millis(20)).await;
            queue.enqueue(late).await.unwrap();
        });

        assert_eq!(report.unwrap().succeeded.len(), 1);
        let remaining = queue.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, late_id);
    }

    #[tokio::test]
    async fn test_zero_check_interval_is_raised_to_minimum() {
        let uploader = Arc::new(FakeUploader::new(&[]));
        let processor = QueueProcessor::new(
            new_queue(),
            uploader,
            Arc::new(StaticNetwork::new(NetworkQuality::Good)),
        )
        .with_intervals(Duration::ZERO, Duration::ZERO);

        assert_eq!(processor.check_interval(), MIN_CHECK_INTERVAL);

        // The loop runs without panicking until the timeout cuts it off
        let outcome = tokio::time::timeout(Duration::from_millis(50), processor.run()).await;
        assert!(outcome.is_err());
    }
}
