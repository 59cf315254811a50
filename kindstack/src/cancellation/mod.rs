//! Cooperative cancellation for provisioning runs.
//!
//! The sequencer, the retrier and the readiness poller all check a shared
//! [`CancellationToken`] at every retry boundary and poll tick, and race
//! their sleeps against it so an interrupt takes effect immediately.

mod token;

pub use token::CancellationToken;
