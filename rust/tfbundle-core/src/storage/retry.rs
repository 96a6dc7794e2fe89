// rust/tfbundle-core/src/storage/retry.rs

//! Exponential backoff for remote downloads.
//!
//! Each attempt of an operation reports whether its failure is transient
//! ([`RetryResult::Retry`]) or final ([`RetryResult::Fail`]). Transient
//! failures are retried after a doubling delay capped at `max_delay`.

use std::time::Duration;

use tracing::debug;

use crate::config::FetchConfig;

/// Backoff policy for a single download.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Stretch each delay by up to a quarter so parallel downloads spread out.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryConfig {
    fn from(fetch: &FetchConfig) -> Self {
        Self {
            max_retries: fetch.max_retries,
            initial_delay: Duration::from_millis(fetch.retry_delay_ms),
            max_delay: Duration::from_millis(fetch.max_retry_delay_ms),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_delay
            .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        let delay = doubled.min(self.max_delay);
        if self.jitter {
            delay + delay.mul_f64(jitter_fraction(retry) / 4.0)
        } else {
            delay
        }
    }
}

/// Cheap deterministic spread in `[0, 1)`; no randomness source is needed.
fn jitter_fraction(retry: u32) -> f64 {
    let mixed = (u64::from(retry) + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Ok(T),
    /// Transient failure.
    Retry(E),
    /// Permanent failure, returned immediately.
    Fail(E),
}

/// Runs `operation` until it succeeds, fails permanently or the retries are
/// used up. The last error is returned.
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = RetryResult<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0;
    loop {
        match operation().await {
            RetryResult::Ok(value) => return Ok(value),
            RetryResult::Fail(error) => return Err(error),
            RetryResult::Retry(error) if retry >= config.max_retries => return Err(error),
            RetryResult::Retry(error) => {
                let delay = config.delay_for_attempt(retry);
                debug!(retry = retry + 1, ?delay, %error, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    #[test]
    fn test_defaults_follow_fetch_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(30));

        let custom = RetryConfig::from(&FetchConfig {
            max_retries: 2,
            retry_delay_ms: 250,
            ..Default::default()
        });
        assert_eq!(custom.max_retries, 2);
        assert_eq!(custom.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        for retry in 0..8 {
            let plain = RetryConfig { jitter: false, ..config.clone() }.delay_for_attempt(retry);
            let jittered = config.delay_for_attempt(retry);
            assert!(jittered >= plain);
            assert!(jittered <= plain + plain / 4);
        }
    }

    #[tokio::test]
    async fn test_fail_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryResult::Fail::<(), _>("object not found") }
        })
        .await;

        assert_eq!(result, Err("object not found"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(5), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    RetryResult::Retry("connection reset")
                } else {
                    RetryResult::Ok(1024u64)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1024));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryResult::Retry::<(), _>("503") }
        })
        .await;

        assert_eq!(result, Err("503"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
