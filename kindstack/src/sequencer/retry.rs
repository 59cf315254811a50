//! Retry with exponential backoff.
//!
//! The delay after failing attempt *k* (1-based) is
//! `initial_delay × backoff_multiplier^(k-1)`, capped at `max_delay`. Jitter
//! is off by default so the schedule is exact.

use crate::cancellation::CancellationToken;
use crate::core::Outcome;
use crate::errors::{ConfigError, ProvisionError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Jitter applied on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact schedule.
    #[default]
    None,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive delays. At least 1.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempts and exact exponential delays.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: u64::try_from(initial_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// A policy that runs the action exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the initial delay.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Checks the policy invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Returns the delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped_ms = raw_ms.min(self.max_delay_ms as f64).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(capped_ms.round() as u64);

        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half.is_zero() {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(Duration::ZERO..=half)
                }
            }
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Every allowed attempt failed.
    Exhausted,
    /// The last error was not retryable.
    Terminal,
    /// Cancellation was requested.
    Cancelled,
}

/// The final error of a retried operation.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {error}")]
pub struct RetryFailure {
    /// Operation name.
    pub operation: String,
    /// Number of attempts actually made.
    pub attempts: u32,
    /// Why retrying stopped.
    pub reason: GiveUpReason,
    /// The last error observed.
    #[source]
    pub error: ProvisionError,
}

impl RetryFailure {
    /// Returns true if the operation stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason == GiveUpReason::Cancelled
    }

    /// Converts into a stage outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome {
        if self.is_cancelled() {
            Outcome::Interrupted
        } else {
            Outcome::Failure(self.to_string())
        }
    }

    /// Unwraps the last error, turning cancellation into `Cancelled`.
    #[must_use]
    pub fn into_error(self) -> ProvisionError {
        if self.is_cancelled() {
            ProvisionError::Cancelled(self.operation)
        } else {
            self.error
        }
    }
}

/// Executes an operation with retry logic.
///
/// The token is checked before every attempt and raced against every
/// backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    token: &CancellationToken,
    mut action: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if token.is_cancelled() {
            return Err(cancelled(operation, attempt, token));
        }

        attempt += 1;
        debug!(operation, attempt, max_attempts, "Attempting");

        let err = match action().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(operation, attempt, error = %err, class = err.class(), "Non-retryable failure");
            return Err(RetryFailure {
                operation: operation.to_string(),
                attempts: attempt,
                reason: if matches!(err, ProvisionError::Cancelled(_)) {
                    GiveUpReason::Cancelled
                } else {
                    GiveUpReason::Terminal
                },
                error: err,
            });
        }

        if attempt >= max_attempts {
            warn!(operation, attempt, error = %err, "Giving up after max attempts");
            return Err(RetryFailure {
                operation: operation.to_string(),
                attempts: attempt,
                reason: GiveUpReason::Exhausted,
                error: err,
            });
        }

        let delay = policy.delay_after(attempt);
        warn!(
            operation,
            attempt,
            error = %err,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Attempt failed, retrying"
        );

        if !token.sleep(delay).await {
            return Err(cancelled(operation, attempt, token));
        }
    }
}

/// Retries a unit action and maps the result onto an [`Outcome`].
pub async fn retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    token: &CancellationToken,
    action: F,
) -> Outcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ProvisionError>>,
{
    match with_retry(policy, operation, token, action).await {
        Ok(()) => Outcome::Success,
        Err(failure) => failure.into_outcome(),
    }
}

fn cancelled(operation: &str, attempts: u32, token: &CancellationToken) -> RetryFailure {
    RetryFailure {
        operation: operation.to_string(),
        attempts,
        reason: GiveUpReason::Cancelled,
        error: ProvisionError::Cancelled(token.reason().unwrap_or_else(|| "cancelled".to_string())),
    }
}
