//! Testing utilities for kindstack sequences.
//!
//! This module provides:
//! - Mock stages with scripted outcomes
//! - In-memory teardown targets
//! - A scripted command runner standing in for `kind`, `kubectl`, `helm`
//!   and `docker`

mod mocks;
mod runner;

pub use mocks::{FakeResource, MockStage, RecordingStage, SlowStage};
pub use runner::FakeRunner;
