//! # Kindstack
//!
//! Provisioning and teardown of a local Kind development environment.
//!
//! Kindstack turns an ordered list of stages into a run that is:
//!
//! - **Sequenced**: stages run one at a time in declaration order
//! - **Fault tolerant**: non-fatal failures are recorded and the run continues
//! - **Retryable**: transient external failures back off exponentially
//! - **Observable**: every stage transition is emitted to an event sink
//! - **Cancellable**: an interrupt stops the current stage at its next wait
//!
//! The [`environment`] module builds the concrete plans (prerequisites,
//! the kind cluster, Helm services, CoreDNS) on top of the generic
//! [`sequencer`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kindstack::prelude::*;
//!
//! let config = Arc::new(EnvConfig::load(None)?);
//! let env = Environment::new(config, Arc::new(ProcessRunner::new()));
//!
//! let token = Arc::new(CancellationToken::new());
//! let report = env
//!     .provisioning_plan(token, Arc::new(LoggingEventSink::default()))?
//!     .run()
//!     .await;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod environment;
pub mod errors;
pub mod events;
pub mod readiness;
pub mod sequencer;
pub mod stages;
pub mod testing;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EnvConfig, ServiceSpec};
    pub use crate::core::{Outcome, RunState, SequenceReport, StageRecord};
    pub use crate::environment::{Environment, EnvironmentStatus};
    pub use crate::errors::{ConfigError, ProvisionError, SequencerValidationError, ToolError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::readiness::{CompoundReadiness, Poller, Readiness, ReadinessCheck, TimeoutPolicy};
    pub use crate::sequencer::{
        with_retry, RetryPolicy, Sequencer, SequencerBuilder, StageSpec, Teardown, TeardownScope,
    };
    pub use crate::stages::{Stage, StageContext};
    pub use crate::tools::{CommandRunner, ProcessRunner};
    pub use std::sync::Arc;
}
