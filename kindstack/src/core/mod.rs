//! Core domain model types for kindstack.
//!
//! - Stage outcomes
//! - Run state machine
//! - The per-run sequence report

mod outcome;
mod report;
mod status;

pub use outcome::Outcome;
pub use report::{SequenceReport, StageRecord};
pub use status::RunState;
