//! Error types for kindstack.
//!
//! Errors are classified by whether retrying could help. The retrier consults
//! [`ProvisionError::is_retryable`] before scheduling another attempt, so a
//! missing configuration file fails on the first attempt while a flaky
//! `kubectl` call is retried with backoff.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for provisioning and teardown actions.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A transient failure of an external collaborator (network blip,
    /// resource not yet scheduled).
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// Polling for a condition exhausted its timeout.
    #[error("{what} not ready after {}s", timeout.as_secs())]
    NotReadyTimeout {
        /// What was being waited on.
        what: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A required local file or tool is absent. Never retried.
    #[error("precondition missing: {0}")]
    PreconditionMissing(String),

    /// The run was cancelled while this action was in progress.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An external command failed.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The stage graph is invalid.
    #[error("{0}")]
    Validation(#[from] SequencerValidationError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Creates a precondition error for a missing file.
    #[must_use]
    pub fn missing_file(description: &str, path: &std::path::Path) -> Self {
        Self::PreconditionMissing(format!("{description} not found at {}", path.display()))
    }

    /// Returns true if another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientExternal(_) | Self::NotReadyTimeout { .. } | Self::Io(_) => true,
            Self::Tool(err) => err.is_retryable(),
            Self::PreconditionMissing(_)
            | Self::Cancelled(_)
            | Self::Config(_)
            | Self::Validation(_) => false,
        }
    }

    /// Returns a short name for the error class, used in log fields.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::TransientExternal(_) => "transient_external",
            Self::NotReadyTimeout { .. } => "not_ready_timeout",
            Self::PreconditionMissing(_) => "precondition_missing",
            Self::Cancelled(_) => "cancelled",
            Self::Tool(_) => "tool",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Io(_) => "io",
        }
    }
}

/// Errors raised while invoking an external program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The program is not installed or not on `PATH`.
    #[error("{program} not found on PATH")]
    NotFound {
        /// The program name.
        program: String,
    },

    /// The program could not be started.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// The program name.
        program: String,
        /// The underlying error message.
        message: String,
    },

    /// The program ran but exited unsuccessfully.
    #[error("`{command}` exited with status {}: {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()), stderr.trim())]
    NonZeroExit {
        /// The full command line.
        command: String,
        /// The exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The program produced output that could not be interpreted.
    #[error("unexpected output from `{command}`: {message}")]
    Parse {
        /// The full command line.
        command: String,
        /// What went wrong.
        message: String,
    },
}

impl ToolError {
    /// Creates a non-zero exit error.
    #[must_use]
    pub fn non_zero(
        command: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::NonZeroExit {
            command: command.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Returns true if the failure may be transient.
    ///
    /// A missing binary will still be missing on the next attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NonZeroExit { .. } | Self::Parse { .. })
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {}: {message}", path.display())]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// The underlying error message.
        message: String,
    },

    /// The configuration file is not valid TOML for the expected schema.
    #[error("cannot parse config {}: {message}", path.display())]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// The underlying error message.
        message: String,
    },

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error raised when a stage graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SequencerValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl SequencerValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}
