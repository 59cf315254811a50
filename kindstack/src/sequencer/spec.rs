//! Stage specifications.

use crate::errors::SequencerValidationError;
use crate::stages::Stage;
use std::sync::Arc;

/// Specification for a single stage in a sequence.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Whether a failure of this stage halts the run.
    pub fatal: bool,
    /// Names of earlier stages this stage depends on, in declaration order.
    pub depends_on: Vec<String>,
    /// If set, the stage is recorded as skipped with this reason.
    pub skip: Option<String>,
}

impl StageSpec {
    /// Creates a fatal stage specification named after its runner.
    #[must_use]
    pub fn new(runner: Arc<dyn Stage>) -> Self {
        Self {
            name: runner.name().to_string(),
            runner,
            fatal: true,
            depends_on: Vec::new(),
            skip: None,
        }
    }

    /// Marks the stage as fatal.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Marks the stage as non-fatal.
    #[must_use]
    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    /// Sets fatality from a flag.
    #[must_use]
    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn after(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.clear();
        for dep in deps {
            self = self.after(dep);
        }
        self
    }

    /// Marks the stage as skipped.
    #[must_use]
    pub fn skip_because(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the stage depends on itself.
    pub fn validate(&self) -> Result<(), SequencerValidationError> {
        if self.name.trim().is_empty() {
            return Err(SequencerValidationError::new("Stage name cannot be empty"));
        }
        if self.depends_on.contains(&self.name) {
            return Err(SequencerValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}
