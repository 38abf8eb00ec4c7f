//! Exponential backoff for throttled calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::Result;

/// Backoff limits. Only throttling errors are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random delay added to each wait
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately; for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff before jitter for the given retry number (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(rand::rng().random_range(0.0..1.0))
        };
        (self.backoff(retry) + jitter).min(self.max_backoff)
    }
}

/// Run `op`, retrying throttling failures with exponential backoff.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_throttling() => {
                if retries >= policy.max_retries {
                    warn!(retries, error = %e, "Maximum retries reached");
                    return Err(e);
                }

                let delay = policy.delay(retries);
                info!(
                    delay_ms = delay.as_millis() as u64,
                    "Request rate too high, retrying"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
        assert_eq!(policy.backoff(40), Duration::from_secs(32));
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let policy = RetryPolicy::default();
        for retry in 0..8 {
            let delay = policy.delay(retry);
            assert!(delay >= policy.backoff(retry));
            assert!(delay <= policy.max_backoff);
        }
    }

    #[tokio::test]
    async fn test_throttling_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::immediate(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Throttled("ThrottlingException".to_string()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::immediate(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Aws("Too many requests".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::immediate(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("bad input".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
