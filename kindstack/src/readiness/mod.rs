//! Waiting for asynchronous conditions in the external system.

mod compound;
mod poller;

pub use compound::{CompoundReadiness, Condition, FnCondition};
pub use poller::{
    await_condition, diagnostic, Diagnostic, Poller, Readiness, ReadinessCheck, TimeoutPolicy,
};
