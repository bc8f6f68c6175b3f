//! Retry policies for broker connection setup
//!
//! The retry loop itself never sleeps on its own schedule: it asks an injected
//! [`BackoffPolicy`] how long to wait after each failed attempt, and gives up
//! when the policy returns `None`. Tests inject a zero-delay policy (or pause
//! tokio time) to exercise exhaustion without waiting.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::{Error, Result};

/// Decides the delay between attempts of a retried operation
pub trait BackoffPolicy: Send + Sync {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Returns `None` once no further attempts should be made.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Maximum number of attempts, for log messages
    fn max_attempts(&self) -> u32;
}

/// Fixed number of attempts with a constant delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub attempts: u32,
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for FixedBackoff {
    /// 10 attempts, 5 seconds apart
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then_some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }
}

/// Exponential backoff with optional random jitter
///
/// Delay after attempt `n` is `base * 2^(n-1)`, capped at `max_delay`, plus up
/// to 50% random jitter when enabled.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(attempts: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            base,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return Some(delay);
        }
        let jitter_ms = (delay.as_millis() as u64) / 2;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Some(delay + Duration::from_millis(extra))
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }
}

/// Run `operation` until it succeeds or `policy` gives up
///
/// Every failed attempt is logged with its attempt number. On exhaustion the
/// last error is wrapped in [`Error::RetriesExhausted`].
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    policy: &dyn BackoffPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match policy.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Giving up after final attempt"
                    );
                    return Err(Error::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fixed_backoff_defaults() {
        let policy = FixedBackoff::default();
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(9), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(10), None);
    }

    #[test]
    fn test_exponential_backoff_caps_delay() {
        let policy = ExponentialBackoff::new(6, Duration::from_millis(100), Duration::from_millis(500))
            .without_jitter();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn test_exponential_jitter_stays_within_half() {
        let policy = ExponentialBackoff::new(5, Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..50 {
            let delay = policy.next_delay(2).unwrap();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff("op", &FixedBackoff::new(3, Duration::ZERO), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff("op", &FixedBackoff::new(5, Duration::ZERO), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Broker("connection refused".into()))
                } else {
                    Ok("up")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_with_default_policy_uses_virtual_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();

        let result: Result<()> = retry_with_backoff("broker connect", &FixedBackoff::default(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Broker("connection refused".into()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        // Nine sleeps between ten attempts
        assert!(started.elapsed() >= Duration::from_secs(45));
        match result {
            Err(Error::RetriesExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 10);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }
}
