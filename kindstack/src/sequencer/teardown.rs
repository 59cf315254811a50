//! Scoped, idempotent teardown.
//!
//! Teardown reuses the sequencer with every step forced non-fatal. Each step
//! is a [`Cleanup`]: it first checks whether its target exists and only then
//! removes it, so running the same scope twice leaves the system in the same
//! state as running it once.

use super::retry::{retry, RetryPolicy};
use super::{SequencerBuilder, StageSpec};
use crate::cancellation::CancellationToken;
use crate::core::{Outcome, RunState, SequenceReport};
use crate::errors::{ProvisionError, SequencerValidationError};
use crate::events::{EventSink, LoggingEventSink};
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{info, warn};

/// Which parts of the environment to tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownScope {
    /// Cluster, then kubeconfig entries, then leftover docker resources.
    #[default]
    All,
    /// Helm releases and the kind cluster.
    ClusterOnly,
    /// Kubeconfig context, cluster and user entries.
    ConfigOnly,
    /// Docker containers, volumes and network left behind.
    ResourcesOnly,
}

impl TeardownScope {
    /// Returns true if the scope covers the group.
    #[must_use]
    pub fn includes(self, group: TeardownGroup) -> bool {
        match self {
            Self::All => true,
            Self::ClusterOnly => group == TeardownGroup::Cluster,
            Self::ConfigOnly => group == TeardownGroup::Config,
            Self::ResourcesOnly => group == TeardownGroup::Resources,
        }
    }
}

impl fmt::Display for TeardownScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::ClusterOnly => write!(f, "cluster-only"),
            Self::ConfigOnly => write!(f, "config-only"),
            Self::ResourcesOnly => write!(f, "resources-only"),
        }
    }
}

/// A group of teardown steps. Groups run in declaration order of the
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownGroup {
    /// Helm releases and the cluster itself.
    Cluster,
    /// Kubeconfig entries.
    Config,
    /// Docker leftovers.
    Resources,
}

/// One idempotent removal.
#[async_trait]
pub trait Cleanup: Send + Sync + Debug {
    /// Returns the step name.
    fn name(&self) -> &str;

    /// Returns true if there is something to remove.
    async fn present(&self) -> Result<bool, ProvisionError>;

    /// Removes the target.
    async fn remove(&self) -> Result<(), ProvisionError>;
}

/// Adapts a [`Cleanup`] into a [`Stage`].
#[derive(Debug)]
pub struct CleanupStage {
    cleanup: Arc<dyn Cleanup>,
    policy: RetryPolicy,
}

impl CleanupStage {
    /// Creates a cleanup stage retrying removal with `policy`.
    #[must_use]
    pub fn new(cleanup: Arc<dyn Cleanup>, policy: RetryPolicy) -> Self {
        Self { cleanup, policy }
    }
}

#[async_trait]
impl Stage for CleanupStage {
    fn name(&self) -> &str {
        self.cleanup.name()
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        match self.cleanup.present().await {
            Ok(false) => {
                info!(stage = %self.name(), "Nothing to do");
                Outcome::Success
            }
            Ok(true) => {
                ctx.emit_progress(format!("removing {}", self.name()));
                let mut recheck = false;
                retry(&self.policy, self.name(), &ctx.token, || {
                    // A failed attempt may still have removed the target.
                    let verify = std::mem::replace(&mut recheck, true);
                    async move {
                        if verify && !self.cleanup.present().await? {
                            info!(stage = %self.name(), "Nothing to do");
                            return Ok(());
                        }
                        self.cleanup.remove().await
                    }
                })
                .await
            }
            Err(e) => {
                warn!(stage = %self.name(), error = %e, "Could not inspect teardown target");
                Outcome::failure(format!("could not inspect {}: {e}", self.name()))
            }
        }
    }
}

/// What teardown would find for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Step group.
    pub group: TeardownGroup,
    /// Step name.
    pub name: String,
    /// Whether the target exists.
    pub present: bool,
    /// Error encountered while inspecting, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A teardown plan: grouped cleanup steps that can be run for any scope.
pub struct Teardown {
    name: String,
    steps: Vec<(TeardownGroup, Arc<dyn Cleanup>)>,
    policy: RetryPolicy,
    token: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
}

impl Teardown {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            policy: RetryPolicy::default(),
            token: Arc::new(CancellationToken::new()),
            sink: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Adds a step to a group.
    #[must_use]
    pub fn step(mut self, group: TeardownGroup, cleanup: Arc<dyn Cleanup>) -> Self {
        self.steps.push((group, cleanup));
        self
    }

    /// Sets the retry policy for removals.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the steps covered by `scope`, in execution order.
    #[must_use]
    pub fn steps_for(&self, scope: TeardownScope) -> Vec<(TeardownGroup, &str)> {
        self.scoped(scope)
            .into_iter()
            .map(|(group, cleanup)| (group, cleanup.name()))
            .collect()
    }

    fn scoped(&self, scope: TeardownScope) -> Vec<(TeardownGroup, &Arc<dyn Cleanup>)> {
        let mut steps: Vec<_> = self
            .steps
            .iter()
            .filter(|(group, _)| scope.includes(*group))
            .map(|(group, cleanup)| (*group, cleanup))
            .collect();
        // Stable: insertion order is kept within a group.
        steps.sort_by_key(|(group, _)| *group);
        steps
    }

    /// Runs every step covered by `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if two steps share a name.
    pub async fn run(
        &self,
        scope: TeardownScope,
    ) -> Result<SequenceReport, SequencerValidationError> {
        let steps = self.scoped(scope);
        info!(sequence = %self.name, scope = %scope, steps = steps.len(), "Starting teardown");

        if steps.is_empty() {
            let mut report = SequenceReport::new(&self.name);
            report.state = RunState::Completed;
            report.finished_at = Some(chrono::Utc::now());
            return Ok(report);
        }

        let mut builder = SequencerBuilder::teardown(&self.name)
            .with_token(self.token.clone())
            .with_sink(self.sink.clone());
        for (_, cleanup) in steps {
            let stage = CleanupStage::new(cleanup.clone(), self.policy.clone());
            builder.add_stage(StageSpec::new(Arc::new(stage)))?;
        }

        Ok(builder.build()?.run().await)
    }

    /// Reports which targets in `scope` currently exist, without removing
    /// anything.
    pub async fn inventory(&self, scope: TeardownScope) -> Vec<InventoryItem> {
        let mut items = Vec::new();
        for (group, cleanup) in self.scoped(scope) {
            let (present, error) = match cleanup.present().await {
                Ok(present) => (present, None),
                Err(e) => (false, Some(e.to_string())),
            };
            items.push(InventoryItem {
                group,
                name: cleanup.name().to_string(),
                present,
                error,
            });
        }
        items
    }
}

impl Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("name", &self.name)
            .field("steps", &self.steps_for(TeardownScope::All))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
