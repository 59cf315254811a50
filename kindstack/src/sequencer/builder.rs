//! Sequencer builder with validation.

use super::{Sequencer, StageSpec};
use crate::cancellation::CancellationToken;
use crate::errors::SequencerValidationError;
use crate::events::{EventSink, LoggingEventSink};
use crate::stages::Stage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long a cancelled stage may keep running to reach its next wait point.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Builder for creating validated sequencers.
///
/// Dependencies must name stages declared earlier, so declaration order is
/// always a valid topological order and the built sequencer runs stages in
/// exactly that order.
#[derive(Clone)]
pub struct SequencerBuilder {
    /// The sequence name.
    name: String,
    /// Stage specifications in declaration order.
    stages: Vec<StageSpec>,
    /// Stage name to position in `stages`.
    index: HashMap<String, usize>,
    /// Forces every stage non-fatal.
    all_non_fatal: bool,
    token: Option<Arc<CancellationToken>>,
    sink: Option<Arc<dyn EventSink>>,
    cancel_grace: Duration,
}

impl SequencerBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            index: HashMap::new(),
            all_non_fatal: false,
            token: None,
            sink: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Creates a builder whose stages are all non-fatal.
    #[must_use]
    pub fn teardown(name: impl Into<String>) -> Self {
        Self {
            all_non_fatal: true,
            ..Self::new(name)
        }
    }

    /// Adds a fatal stage depending on `dependencies`.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (duplicate name, unknown
    /// dependency, self-dependency).
    pub fn stage(
        self,
        runner: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, SequencerValidationError> {
        self.with_spec(StageSpec::new(runner).with_dependencies(dependencies.iter().copied()))
    }

    /// Adds a stage specification, consuming and returning the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn with_spec(mut self, spec: StageSpec) -> Result<Self, SequencerValidationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage(&mut self, mut spec: StageSpec) -> Result<(), SequencerValidationError> {
        spec.validate()?;

        if self.index.contains_key(&spec.name) {
            return Err(SequencerValidationError::new(format!(
                "Stage '{}' is declared more than once",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()]));
        }

        for dep in &spec.depends_on {
            if !self.index.contains_key(dep) {
                return Err(SequencerValidationError::new(format!(
                    "Stage '{}' depends on unknown stage '{}'; dependencies must be declared first",
                    spec.name, dep
                ))
                .with_stages(vec![spec.name.clone(), dep.clone()]));
            }
        }

        if self.all_non_fatal {
            spec.fatal = false;
        }

        self.index.insert(spec.name.clone(), self.stages.len());
        self.stages.push(spec);
        Ok(())
    }

    /// Sets the cancellation token shared with the caller.
    #[must_use]
    pub fn with_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets how long a stage still running at cancellation may continue
    /// before it is dropped.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Builds the sequencer.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<Sequencer, SequencerValidationError> {
        if self.stages.is_empty() {
            return Err(SequencerValidationError::new(format!(
                "Sequence '{}' has no stages",
                self.name
            )));
        }

        Ok(Sequencer::new(
            self.name,
            self.stages,
            self.token.unwrap_or_default(),
            self.sink
                .unwrap_or_else(|| Arc::new(LoggingEventSink::default())),
            self.cancel_grace,
        ))
    }

    /// Returns the sequence name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for SequencerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("all_non_fatal", &self.all_non_fatal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[test]
    fn test_builder_creation() {
        let builder = SequencerBuilder::new("provision");
        assert_eq!(builder.name(), "provision");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_with_dependencies() {
        let sequencer = SequencerBuilder::new("provision")
            .stage(noop("cluster"), &[])
            .unwrap()
            .stage(noop("ingress"), &["cluster"])
            .unwrap()
            .stage(noop("dns"), &["cluster", "ingress"])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(sequencer.execution_order(), vec!["cluster", "ingress", "dns"]);
        assert_eq!(
            sequencer.depends_on("dns"),
            Some(&["cluster".to_string(), "ingress".to_string()][..])
        );
    }

    #[test]
    fn test_builder_missing_dependency() {
        let err = SequencerBuilder::new("provision")
            .stage(noop("ingress"), &["cluster"])
            .unwrap_err();
        assert!(err.message.contains("unknown stage 'cluster'"));
        assert_eq!(err.stages, vec!["ingress", "cluster"]);
    }

    #[test]
    fn test_builder_rejects_forward_dependency() {
        // "later" exists in the final graph but is declared after its dependent.
        let mut builder = SequencerBuilder::new("provision");
        let forward = StageSpec::new(noop("early")).after("later");
        assert!(builder.add_stage(forward).is_err());
        builder.add_stage(StageSpec::new(noop("later"))).unwrap();
        assert_eq!(builder.stage_count(), 1);
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let err = SequencerBuilder::new("provision")
            .stage(noop("cluster"), &[])
            .unwrap()
            .stage(noop("cluster"), &[])
            .unwrap_err();
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn test_builder_self_dependency() {
        let result = SequencerBuilder::new("provision").stage(noop("dns"), &["dns"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_empty_fails() {
        let err = SequencerBuilder::new("provision").build().unwrap_err();
        assert!(err.message.contains("no stages"));
    }

    #[test]
    fn test_teardown_builder_forces_non_fatal() {
        let sequencer = SequencerBuilder::teardown("teardown")
            .with_spec(StageSpec::new(noop("kind-cluster")).fatal())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(sequencer.is_fatal("kind-cluster"), Some(false));
    }
}
