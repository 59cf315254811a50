//! Mock stages and cleanup targets for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::Outcome;
use crate::errors::ProvisionError;
use crate::sequencer::Cleanup;
use crate::stages::{Stage, StageContext};

/// A stage that returns scripted outcomes in order, repeating the last one.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    outcomes: Mutex<VecDeque<Outcome>>,
    call_count: AtomicUsize,
}

impl MockStage {
    /// Creates a mock stage that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::scripted(name, vec![Outcome::Success])
    }

    /// Creates a mock stage that always fails with `reason`.
    #[must_use]
    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::scripted(name, vec![Outcome::failure(reason)])
    }

    /// Creates a mock stage returning `outcomes` in order.
    #[must_use]
    pub fn scripted(name: impl Into<String>, outcomes: Vec<Outcome>) -> Self {
        Self {
            name: name.into(),
            outcomes: Mutex::new(outcomes.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Outcome {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(Outcome::Success)
        } else {
            outcomes.front().cloned().unwrap_or(Outcome::Success)
        }
    }
}

/// A stage that records its name into a shared log when executed.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStage {
    /// Creates a recording stage appending to `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        self.log.lock().push(ctx.stage_name.clone());
        Outcome::Success
    }
}

/// A stage that takes time to execute.
///
/// A cooperative slow stage sleeps on the run's token and reports
/// [`Outcome::Interrupted`] when cut short; a stubborn one ignores it.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    cooperative: bool,
}

impl SlowStage {
    /// Creates a slow stage that honours cancellation.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            cooperative: true,
        }
    }

    /// Creates a slow stage that ignores cancellation.
    #[must_use]
    pub fn stubborn(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            cooperative: false,
            ..Self::new(name, delay)
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        if self.cooperative {
            if ctx.token.sleep(self.delay).await {
                Outcome::Success
            } else {
                Outcome::Interrupted
            }
        } else {
            tokio::time::sleep(self.delay).await;
            Outcome::Success
        }
    }
}

/// An in-memory teardown target.
#[derive(Debug)]
pub struct FakeResource {
    name: String,
    present: AtomicBool,
    removals: AtomicUsize,
    failures_left: AtomicUsize,
    errors_after_removal: bool,
}

impl FakeResource {
    /// A target that exists.
    #[must_use]
    pub fn present(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_state(name, true, 0))
    }

    /// A target that does not exist.
    #[must_use]
    pub fn absent(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_state(name, false, 0))
    }

    /// A target whose first `failures` removals fail transiently.
    #[must_use]
    pub fn flaky(name: impl Into<String>, failures: usize) -> Arc<Self> {
        Arc::new(Self::with_state(name, true, failures))
    }

    /// A target whose removal succeeds but reports a transient error, and
    /// whose later removals fail with "not found".
    #[must_use]
    pub fn vanishing(name: impl Into<String>) -> Arc<Self> {
        let mut resource = Self::with_state(name, true, 0);
        resource.errors_after_removal = true;
        Arc::new(resource)
    }

    fn with_state(name: impl Into<String>, present: bool, failures: usize) -> Self {
        Self {
            name: name.into(),
            present: AtomicBool::new(present),
            removals: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            errors_after_removal: false,
        }
    }

    /// Returns true if the target still exists.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Returns the number of removal attempts.
    #[must_use]
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cleanup for FakeResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        Ok(self.is_present())
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if self.errors_after_removal {
            let message = if self.present.swap(false, Ordering::SeqCst) {
                format!("timed out waiting for {} removal", self.name)
            } else {
                format!("{}: not found", self.name)
            };
            return Err(ProvisionError::TransientExternal(message));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProvisionError::TransientExternal(format!(
                "{} is busy",
                self.name
            )));
        }
        self.present.store(false, Ordering::SeqCst);
        Ok(())
    }
}
