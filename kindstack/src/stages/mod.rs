//! Stage trait and implementations.
//!
//! A stage is one named step of a provisioning or teardown run. Stages report
//! an [`Outcome`] rather than an error; whether a failure halts the run is
//! decided by the sequencer from the stage's `fatal` flag.

use crate::cancellation::CancellationToken;
use crate::core::Outcome;
use crate::events::{names, EventSink};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait for sequencer stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// Implementations should observe `ctx.token` at their own wait points
    /// and return [`Outcome::Interrupted`] when it fires.
    async fn execute(&self, ctx: &StageContext) -> Outcome;
}

/// Per-stage execution context handed to [`Stage::execute`].
#[derive(Clone)]
pub struct StageContext {
    /// Name of the executing stage.
    pub stage_name: String,
    /// The run's cancellation token.
    pub token: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
}

impl StageContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        stage_name: impl Into<String>,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            token,
            sink,
        }
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Emits a progress message for this stage.
    pub fn emit_progress(&self, message: impl Into<String>) {
        self.sink.try_emit(
            names::STAGE_PROGRESS,
            Some(serde_json::json!({
                "stage": self.stage_name,
                "message": message.into(),
            })),
        );
    }
}

impl Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("stage_name", &self.stage_name)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// An async function-based stage.
pub struct FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that always succeeds without doing anything.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Outcome {
        Outcome::Success
    }
}
