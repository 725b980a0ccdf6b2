use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Errors that may succeed if the same request is simply sent again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff: `base_delay * 2^n` before retry `n + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 retries after 1s, 2s and 4s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1).min(16))
    }
}

/// Successful result along with how many retries it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `operation`, retrying transient failures per `policy`.
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<Retried<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(Retried { value, retries }),
            Err(error) => {
                if !error.is_transient() || retries >= policy.max_retries {
                    return Err(error);
                }

                retries += 1;
                let delay = policy.delay_for(retries);
                tracing::warn!(
                    error = %error,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
                metrics::counter!("photo_upload_retries_total").increment(1);
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Timeout,
        Rejected,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            matches!(self, FakeError::Timeout)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_three_timeouts_then_success() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = with_retry(&fast_policy(), move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Err(FakeError::Timeout)
            } else {
                Ok("stored")
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "stored");
        assert_eq!(result.retries, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<Retried<()>, _> = with_retry(&fast_policy(), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Timeout)
        })
        .await;

        assert_eq!(result.unwrap_err(), FakeError::Timeout);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<Retried<()>, _> = with_retry(&fast_policy(), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Rejected)
        })
        .await;

        assert_eq!(result.unwrap_err(), FakeError::Rejected);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
