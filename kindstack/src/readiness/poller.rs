//! Polling an external condition until it holds or a deadline passes.

use crate::cancellation::CancellationToken;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a caller should do when a readiness check times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Log a warning and let the stage degrade.
    #[default]
    Warn,
    /// Fail the stage.
    Fail,
}

/// Poll interval, timeout and timeout policy for one readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessCheck {
    /// Delay between predicate evaluations, in milliseconds.
    pub poll_interval_ms: u64,
    /// Total time budget, in milliseconds.
    pub timeout_ms: u64,
    /// What to do on timeout.
    pub on_timeout: TimeoutPolicy,
}

impl Default for ReadinessCheck {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            timeout_ms: 300_000,
            on_timeout: TimeoutPolicy::Warn,
        }
    }
}

impl ReadinessCheck {
    /// Creates a check from durations.
    #[must_use]
    pub fn new(poll_interval: Duration, timeout: Duration, on_timeout: TimeoutPolicy) -> Self {
        Self {
            poll_interval_ms: u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            on_timeout,
        }
    }

    /// Returns the poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The result of waiting on a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The predicate returned true.
    Ready {
        /// Number of predicate evaluations made.
        evaluations: u32,
    },
    /// The timeout elapsed first.
    TimedOut {
        /// Number of predicate evaluations made.
        evaluations: u32,
    },
    /// Cancellation was requested first.
    Cancelled,
}

impl Readiness {
    /// Returns true if the condition became true.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Returns true if cancellation ended the wait.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the number of evaluations made, zero when cancelled.
    #[must_use]
    pub fn evaluations(&self) -> u32 {
        match self {
            Self::Ready { evaluations } | Self::TimedOut { evaluations } => *evaluations,
            Self::Cancelled => 0,
        }
    }
}

/// Callback invoked once when a wait times out. Receives the name of what
/// was being waited on.
pub type Diagnostic<'a> = Box<dyn FnOnce(String) -> BoxFuture<'a, ()> + Send + 'a>;

/// Wraps an async closure as a [`Diagnostic`].
pub fn diagnostic<'a, F, Fut>(f: F) -> Diagnostic<'a>
where
    F: FnOnce(String) -> Fut + Send + 'a,
    Fut: Future<Output = ()> + Send + 'a,
{
    Box::new(move |name| Box::pin(f(name)))
}

/// Polls a predicate on a fixed interval.
pub struct Poller<'a> {
    name: String,
    poll_interval: Duration,
    timeout: Duration,
    token: &'a CancellationToken,
    on_timeout: Option<Diagnostic<'a>>,
}

impl<'a> Poller<'a> {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            poll_interval,
            timeout,
            token,
            on_timeout: None,
        }
    }

    /// Creates a poller from a configured check.
    #[must_use]
    pub fn from_check(
        name: impl Into<String>,
        check: &ReadinessCheck,
        token: &'a CancellationToken,
    ) -> Self {
        Self::new(name, check.poll_interval(), check.timeout(), token)
    }

    /// Registers a diagnostic callback run once on timeout.
    #[must_use]
    pub fn on_timeout(mut self, diagnostic: Diagnostic<'a>) -> Self {
        self.on_timeout = Some(diagnostic);
        self
    }

    /// Evaluates the predicate until it holds, the timeout elapses, or the
    /// token is cancelled.
    ///
    /// The first evaluation happens immediately. After each false result the
    /// poller stops if elapsed time has reached the timeout, otherwise sleeps
    /// one interval. An evaluation still running at the deadline counts as
    /// false.
    pub async fn wait<F, Fut>(self, mut predicate: F) -> Readiness
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut evaluations = 0u32;

        loop {
            if self.token.is_cancelled() {
                return Readiness::Cancelled;
            }

            evaluations += 1;
            let ready = tokio::select! {
                result = tokio::time::timeout_at(deadline, predicate()) => {
                    result.unwrap_or_else(|_| {
                        debug!(condition = %self.name, evaluations, "Evaluation hit the deadline");
                        false
                    })
                }
                () = self.token.cancelled() => return Readiness::Cancelled,
            };
            if ready {
                debug!(condition = %self.name, evaluations, "Condition satisfied");
                return Readiness::Ready { evaluations };
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    condition = %self.name,
                    evaluations,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Condition not satisfied before timeout"
                );
                if let Some(diagnostic) = self.on_timeout {
                    diagnostic(self.name.clone()).await;
                }
                return Readiness::TimedOut { evaluations };
            }

            debug!(condition = %self.name, evaluations, "Condition not yet satisfied");
            if !self.token.sleep(self.poll_interval).await {
                return Readiness::Cancelled;
            }
        }
    }
}

impl std::fmt::Debug for Poller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("has_diagnostic", &self.on_timeout.is_some())
            .finish_non_exhaustive()
    }
}

/// Polls `predicate` every `poll_interval` until it returns true or
/// `timeout` elapses.
pub async fn await_condition<F, Fut>(
    predicate: F,
    poll_interval: Duration,
    timeout: Duration,
    token: &CancellationToken,
) -> Readiness
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    Poller::new("condition", poll_interval, timeout, token)
        .wait(predicate)
        .await
}
