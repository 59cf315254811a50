//! Stage outcome type.

use crate::errors::ProvisionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The terminal outcome of one stage.
///
/// `Success`, `Failure` and `Degraded` are produced by stages themselves.
/// `Skipped`, `NotRun` and `Interrupted` are assigned by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// The stage reached its target state (including "already there").
    Success,
    /// The stage failed.
    Failure(String),
    /// The stage did not fully succeed but the run may continue.
    Degraded(String),
    /// The stage was skipped by configuration.
    Skipped(String),
    /// The stage never started because the run aborted earlier.
    NotRun,
    /// The stage was in progress when cancellation was requested.
    Interrupted,
}

impl Outcome {
    /// Creates a failure outcome.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Creates a degraded outcome.
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded(reason.into())
    }

    /// Maps an action result onto an outcome.
    #[must_use]
    pub fn from_result(result: Result<(), ProvisionError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(ProvisionError::Cancelled(_)) => Self::Interrupted,
            Err(e) => Self::Failure(e.to_string()),
        }
    }

    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true for `Failure`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the outcome should surface as a warning in the report.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Failure(_) | Self::Degraded(_))
    }

    /// Returns the reason carried by the outcome, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failure(r) | Self::Degraded(r) | Self::Skipped(r) => Some(r),
            Self::Success | Self::NotRun | Self::Interrupted => None,
        }
    }

    /// Returns the short status label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::Degraded(_) => "degraded",
            Self::Skipped(_) => "skipped",
            Self::NotRun => "not_run",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.label(), reason),
            None => write!(f, "{}", self.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        assert_eq!(Outcome::from_result(Ok(())), Outcome::Success);
        assert_eq!(
            Outcome::from_result(Err(ProvisionError::Cancelled("ctrl-c".into()))),
            Outcome::Interrupted
        );
        let failed = Outcome::from_result(Err(ProvisionError::PreconditionMissing(
            "values/dex.yaml".into(),
        )));
        assert!(failed.is_failure());
        assert!(failed.reason().is_some_and(|r| r.contains("values/dex.yaml")));
    }

    #[test]
    fn test_warning_classification() {
        assert!(Outcome::failure("x").is_warning());
        assert!(Outcome::degraded("x").is_warning());
        assert!(!Outcome::Success.is_warning());
        assert!(!Outcome::Skipped("disabled".into()).is_warning());
        assert!(!Outcome::NotRun.is_warning());
    }

    #[test]
    fn test_display() {
        assert_eq!(Outcome::Success.to_string(), "success");
        assert_eq!(Outcome::degraded("webhook slow").to_string(), "degraded: webhook slow");
    }

    #[test]
    fn test_serialize_shape() {
        let json = serde_json::to_value(Outcome::failure("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failure", "reason": "boom"}));

        let json = serde_json::to_value(Outcome::NotRun).unwrap();
        assert_eq!(json, serde_json::json!({"status": "not_run"}));
    }
}
