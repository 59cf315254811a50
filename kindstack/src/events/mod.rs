//! Lifecycle events emitted by the sequencer.
//!
//! Sinks are passed explicitly to the sequencer at construction; there is no
//! process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A run began.
    pub const RUN_STARTED: &str = "run.started";
    /// A run reached a terminal state.
    pub const RUN_FINISHED: &str = "run.finished";
    /// A stage is about to act.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage succeeded.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage degraded.
    pub const STAGE_DEGRADED: &str = "stage.degraded";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was skipped.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage was interrupted by cancellation.
    pub const STAGE_INTERRUPTED: &str = "stage.interrupted";
    /// A stage reports progress from inside its action.
    pub const STAGE_PROGRESS: &str = "stage.progress";
}
