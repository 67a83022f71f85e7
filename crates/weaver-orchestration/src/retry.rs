//! Retry policy with jittered exponential backoff.
//!
//! One policy serves every tool call the invoker makes. Outcome
//! classification rides on [`ToolError::retriable`]: quota pressure and
//! transient provider failures earn another attempt, everything else is
//! fatal for the call. The circuit breaker lives in the broker, not here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use weaver_tools::ToolError;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Fraction of jitter applied to every delay.
pub const JITTER_FRACTION: f64 = 0.2;

/// Retry schedule: up to `max_attempts`, exponential backoff
/// `base * 2^(attempt-1)` with ±20% jitter, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base backoff delay.
    pub base_delay: Duration,
    /// Cap applied after the exponential step.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given number of attempts and default delays.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// The backoff delay before retry number `attempt` (1-based: the delay
    /// after the first failed attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp =
            self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }

    /// Run `op` under this policy. Returns the final outcome together with
    /// the number of attempts consumed. Backoff sleeps observe the
    /// cancellation token; a cancelled job stops retrying immediately.
    pub async fn run<T, F, Fut>(
        &self,
        cancellation: &CancellationToken,
        mut op: F,
    ) -> (Result<T, ToolError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.retriable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying tool call");
                    tokio::select! {
                        _ = cancellation.cancelled() => {
                            return (Err(ToolError::Cancelled), attempt);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn delays_grow_exponentially_within_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };
        for attempt in 1..=4u32 {
            let expected = 0.1 * 2f64.powi(attempt as i32 - 1);
            let actual = policy.delay_for(attempt).as_secs_f64();
            assert!(
                (actual - expected).abs() <= expected * JITTER_FRACTION + 1e-9,
                "attempt {attempt}: {actual} outside jitter band around {expected}"
            );
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        };
        let delay = policy.delay_for(8).as_secs_f64();
        assert!(delay <= 10.0 * (1.0 + JITTER_FRACTION));
    }

    #[tokio::test]
    async fn retriable_errors_consume_attempts_then_succeed() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast_policy(3)
            .run(&CancellationToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ToolError::Busy("quota".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn fatal_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast_policy(3)
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ToolError::Unavailable("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(ToolError::Unavailable(_))));
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_exhausted() {
        let (result, attempts) = fast_policy(3)
            .run(&CancellationToken::new(), |_| async {
                Err::<(), _>(ToolError::Busy("quota".into()))
            })
            .await;
        assert!(matches!(result, Err(ToolError::Busy(_))));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn cancellation_preempts_backoff() {
        let token = CancellationToken::new();
        token.cancel();
        let (result, attempts) = fast_policy(5)
            .run(&token, |_| async { Err::<(), _>(ToolError::Busy("quota".into())) })
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
        assert_eq!(attempts, 1);
    }
}
