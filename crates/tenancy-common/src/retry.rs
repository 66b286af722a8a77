//! Bounded retry with exponential backoff.
//!
//! Used to absorb short windows where the cluster's authorizer has not yet
//! observed a freshly created role binding. Unlike an open-ended retry loop,
//! every schedule here has a fixed number of steps so no call can block
//! indefinitely.
//!
//! # Example
//!
//! ```ignore
//! use tenancy_common::retry::{retry_with_backoff, Backoff};
//!
//! let pod = retry_with_backoff(
//!     &Backoff::default(),
//!     "get",
//!     |e: &Error| e.is_forbidden(),
//!     || client.get(&resource, &key),
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Exponential backoff schedule with a fixed number of attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry
    pub factor: f64,
    /// Total number of attempts, including the first (0 behaves like 1)
    pub steps: u32,
    /// Random spread applied to each delay (0.0 = none, 0.5 = ±50%)
    pub jitter: f64,
    /// Upper bound for a single delay
    pub max_delay: Option<Duration>,
}

impl Default for Backoff {
    /// 5ms doubling over 10 attempts, roughly 2.5s of total sleep.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            factor: 2.0,
            steps: 10,
            jitter: 0.0,
            max_delay: None,
        }
    }
}

impl Backoff {
    /// A schedule with `steps` attempts and no delay between them
    pub fn immediate(steps: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            steps,
            ..Default::default()
        }
    }

    /// Replace the number of attempts
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Delay to sleep after the given (1-based) failed attempt
    ///
    /// Saturates at [`Duration::MAX`] once the exponent overflows.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = match self.max_delay {
            Some(max) => base.min(max.as_secs_f64()),
            None => base,
        };

        let jittered = if self.jitter > 0.0 {
            capped * rand::thread_rng().gen_range((1.0 - self.jitter)..(1.0 + self.jitter))
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Worst-case total sleep across all steps (ignoring jitter)
    pub fn total_delay(&self) -> Duration {
        (1..self.steps.max(1))
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Execute an async operation, retrying errors accepted by `retryable`.
///
/// Non-retryable errors and successes return immediately. A retryable error
/// on the last step is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    backoff: &Backoff,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) => {
                if attempt >= steps {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation still failing after final retry"
                    );
                    return Err(e);
                }

                let delay = backoff.delay_for(attempt);
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let backoff = Backoff::immediate(3);
        let result: Result<i32, &str> =
            retry_with_backoff(&backoff, "op", |_| true, || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> =
            retry_with_backoff(&Backoff::immediate(5), "op", |_| true, || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err("fail")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_steps() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> =
            retry_with_backoff(&Backoff::immediate(5), "op", |_| true, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("always fails")
                }
            })
            .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_after_one_attempt() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> =
            retry_with_backoff(&Backoff::immediate(5), "op", |e| *e == "transient", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                }
            })
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_steps_still_attempts_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let _: Result<(), &str> = retry_with_backoff(&Backoff::immediate(0), "op", |_| true, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("fail")
            }
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_schedule_sleeps_exponentially() {
        let start = tokio::time::Instant::now();

        let result: Result<(), &str> =
            retry_with_backoff(&Backoff::default(), "op", |_| true, || async { Err("fail") })
                .await;

        assert!(result.is_err());
        // 5ms * (2^9 - 1) across the 9 sleeps between 10 attempts
        assert_eq!(start.elapsed(), Duration::from_millis(2555));
        assert_eq!(Backoff::default().total_delay(), Duration::from_millis(2555));
    }

    #[test]
    fn test_long_schedules_saturate() {
        let backoff = Backoff::default().with_steps(100);
        assert_eq!(backoff.steps, 100);
        assert_eq!(backoff.delay_for(80), Duration::MAX);
        assert_eq!(backoff.total_delay(), Duration::MAX);

        let capped = Backoff {
            max_delay: Some(Duration::from_secs(1)),
            ..Backoff::default().with_steps(100)
        };
        assert_eq!(capped.delay_for(80), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_for_respects_max_delay() {
        let backoff = Backoff {
            max_delay: Some(Duration::from_millis(12)),
            ..Default::default()
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(5));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(12));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(100),
            jitter: 0.5,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = backoff.delay_for(1);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }
}
