//! Sequencing of provisioning and teardown stages.
//!
//! This module provides:
//! - Stage specifications
//! - The sequencer builder with validation
//! - Strictly ordered execution with fatal/non-fatal stages
//! - Retry with exponential backoff
//! - Scoped teardown built from idempotent cleanups

mod builder;
mod retry;
mod runner;
mod spec;
mod teardown;

#[cfg(test)]
mod integration_tests;

pub use builder::{SequencerBuilder, DEFAULT_CANCEL_GRACE};
pub use retry::{retry, with_retry, GiveUpReason, JitterStrategy, RetryFailure, RetryPolicy};
pub use runner::Sequencer;
pub use spec::StageSpec;
pub use teardown::{
    Cleanup, CleanupStage, InventoryItem, Teardown, TeardownGroup, TeardownScope,
};
