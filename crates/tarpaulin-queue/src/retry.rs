//! Connection retry policy and redelivery backoff.

use crate::error::{QueueError, QueueResult};
use std::future::Future;
use std::time::Duration;
use tarpaulin_core::Config;

/// Maximum delay in seconds before redelivering a failed message. Caps exponential
/// backoff so that high delivery counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Redelivery delay after `retries` failed attempts (exponential with cap).
#[inline]
pub fn compute_retry_backoff(retries: u32) -> Duration {
    let secs = 2_u64
        .checked_pow(retries)
        .unwrap_or(MAX_RETRY_BACKOFF_SECS)
        .min(MAX_RETRY_BACKOFF_SECS);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2_u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// How long to keep retrying a refused broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Fixed `QUEUE_CONNECT_RETRY_MS` delay, bounded by `QUEUE_CONNECT_MAX_ATTEMPTS` if set.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.queue_connect_max_attempts(),
            backoff: Backoff::Fixed(config.queue_connect_retry()),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(100))
    }
}

/// Run `op` until it succeeds, retrying only `QueueError::ConnectionRefused`.
///
/// Any other error is returned immediately, as is the last refusal once the
/// policy's attempts are used up.
pub async fn connect_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> QueueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        match op().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Broker connection established after retries");
                }
                return Ok(value);
            }
            Err(QueueError::ConnectionRefused(msg)) if !policy.exhausted(attempts) => {
                let delay = policy.backoff.delay(attempts);
                tracing::warn!(
                    attempt = attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %msg,
                    "Broker connection refused, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff(0), Duration::from_secs(1));
        assert_eq!(compute_retry_backoff(1), Duration::from_secs(2));
        assert_eq!(compute_retry_backoff(2), Duration::from_secs(4));
        assert_eq!(compute_retry_backoff(8), Duration::from_secs(256));
        assert_eq!(compute_retry_backoff(9), Duration::from_secs(MAX_RETRY_BACKOFF_SECS));
        assert_eq!(compute_retry_backoff(200), Duration::from_secs(MAX_RETRY_BACKOFF_SECS));
    }

    #[test]
    fn exponential_backoff_doubles_up_to_max() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
        assert_eq!(backoff.delay(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_refusals_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));

        let result = connect_with_retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(QueueError::ConnectionRefused("down".to_string()))
            } else {
                Ok("connected")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(3);

        let result: QueueResult<()> = connect_with_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::ConnectionRefused("down".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_connection_refused());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));

        let result: QueueResult<()> = connect_with_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Config("bad url".to_string()))
        })
        .await;

        assert!(matches!(result, Err(QueueError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
