//! Bounded exponential backoff for provider calls.
//!
//! The document store and messaging provider both shed load with
//! quota-classified errors. Those are worth retrying with increasing delays;
//! anything else (bad payload, unknown tenant, auth) fails the same way on
//! every attempt and is returned immediately.

use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for [`retry_if`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Delay before the second attempt; multiplied after each retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the previous delay on each retry.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        // Quota errors back off at 2s, 4s, 8s...
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Schedule with millisecond delays for unit tests.
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Retry an async operation, but only while `retryable` says the error is
/// transient.
///
/// Calls `f()` up to `policy.max_attempts` times. After a failure that
/// `retryable` accepts, sleeps for the current delay and multiplies it
/// (capped at `policy.max_delay`). A failure that `retryable` rejects is
/// returned at once, whatever the attempt count.
///
/// # Panics
/// Panics if `policy.max_attempts` is 0.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    retryable: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    assert!(
        policy.max_attempts > 0,
        "BackoffPolicy.max_attempts must be at least 1"
    );

    let mut delay = policy.initial_delay;
    let mut last_err: Option<E> = None;

    for attempt in 1..=policy.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt < policy.max_attempts && retryable(&e) {
                    warn!(
                        attempt,
                        max = policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        err = %e,
                        "transient error — retrying"
                    );
                    tokio::time::sleep(delay).await;
                    let next_ms = (delay.as_millis() as f64 * policy.multiplier) as u128;
                    delay = Duration::from_millis(next_ms.min(policy.max_delay.as_millis()) as u64);
                } else {
                    if attempt > 1 {
                        warn!(attempt, max = policy.max_attempts, err = %e, "giving up");
                    }
                    last_err = Some(e);
                    break;
                }
            }
        }
    }

    // The loop always assigns last_err before breaking.
    Err(last_err.expect("retry loop ended without an error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let policy = BackoffPolicy::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_if(&policy, |_| true, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = BackoffPolicy::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_if(&policy, |_| true, || {
            let c = calls2.clone();
            async move {
                let n = c.fetch_add(1, Ordering::Relaxed) + 1;
                if n < 3 {
                    Err(format!("attempt {n} throttled"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let policy = BackoffPolicy::instant();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> =
            retry_if(&policy, |e: &String| e.contains("quota"), || {
                let c = calls2.clone();
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err("invalid payload".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn returns_last_error_after_all_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::instant()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, String> = retry_if(&policy, |_| true, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err("quota exceeded".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "quota exceeded");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn delay_is_capped_at_max() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 10.0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let start = std::time::Instant::now();
        let _: Result<(), String> = retry_if(&policy, |_| true, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err("throttled".to_string())
            }
        })
        .await;

        // 10 attempts with at most 5ms between them; 1s of CI headroom.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::Relaxed), 10);
    }
}
