//! Bounded redelivery with exponential backoff.
//!
//! A [`RetryPolicy`] counts *deliveries*, not retries: `max_attempts = 3`
//! means the first delivery plus two redeliveries. The pause before
//! redelivery `n` (1-based) is `initial_delay * multiplier^(n-1)`, capped at
//! `max_delay`.
//!
//! # Example
//!
//! ```rust
//! use shipkafka_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(2000))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let result = retry_with_backoff(&policy, || async {
//!     Ok::<_, String>(42)
//! })
//! .await
//! .map_err(|failed| failed.value)?;
//!
//! assert_eq!(result.value, 42);
//! assert_eq!(result.attempts, 1);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Redelivery policy for one listener.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `initial_delay`: 2 seconds
/// - `max_delay`: 10 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total deliveries, including the first one
    pub max_attempts: u32,
    /// Pause before the first redelivery
    pub initial_delay: Duration,
    /// Cap on any single pause
    pub max_delay: Duration,
    /// Growth factor between pauses
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Pause after failed delivery number `attempt` (1-based).
    ///
    /// Attempt `0` is treated like attempt `1`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Every pause a message that never succeeds will sit through.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the total number of deliveries.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the pause before the first redelivery.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap on any single pause.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor between pauses.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`]. At least one delivery is always made.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_secs(2)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(10)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// A value paired with the number of deliveries it took to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// Success value or last error
    pub value: T,
    /// Deliveries made
    pub attempts: u32,
}

/// Retry an async operation on every error.
///
/// # Errors
///
/// Returns the last error once `policy.max_attempts` deliveries have failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<Attempted<T>, Attempted<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// A rejected error ends the loop at once, without spending the remaining
/// budget.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once
/// `policy.max_attempts` deliveries have failed.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<Attempted<T>, Attempted<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after redelivery");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, redelivering..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(2000))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
    }

    #[test]
    fn schedule_has_one_pause_per_redelivery() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(5000))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(30))
            .build();

        assert_eq!(
            policy.schedule(),
            vec![Duration::from_millis(5000), Duration::from_millis(10000)]
        );
    }

    #[test]
    fn huge_exponent_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn zero_attempts_still_delivers_once() {
        assert_eq!(RetryPolicy::builder().max_attempts(0).build().max_attempts, 1);
    }

    #[tokio::test]
    async fn first_success_takes_one_attempt() {
        let result = retry_with_backoff(&fast(3), || async { Ok::<_, String>(42) }).await;

        assert_eq!(
            result,
            Ok(Attempted {
                value: 42,
                attempts: 1
            })
        );
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&fast(3), || {
            let c = Arc::clone(&counter);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(format!("attempt {n}")) } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(result.map(|ok| ok.attempts), Ok(3));
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&fast(3), || {
            let c = Arc::clone(&counter);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(format!("attempt {n}"))
            }
        })
        .await;

        assert_eq!(
            result,
            Err(Attempted {
                value: "attempt 2".to_string(),
                attempts: 3
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_predicate(
            &fast(5),
            || {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("permanent".to_string())
                }
            },
            |err: &String| err.contains("transient"),
        )
        .await;

        assert_eq!(result.map_err(|e| e.attempts), Err(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
