//! Run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a provisioning or teardown run.
///
/// `NotStarted -> Running -> {Completed, CompletedWithWarnings, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// The run has not begun.
    #[default]
    NotStarted,
    /// Stages are executing.
    Running,
    /// Every stage succeeded or was skipped.
    Completed,
    /// The run finished but at least one stage failed or degraded.
    CompletedWithWarnings,
    /// A fatal stage failed or the run was cancelled.
    Aborted,
}

impl RunState {
    /// Returns true if the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Aborted
        )
    }

    /// Returns the process exit code for this state.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::CompletedWithWarnings => 0,
            Self::Aborted => 1,
            Self::NotStarted | Self::Running => 2,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithWarnings => write!(f, "completed with warnings"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
