//! Strictly ordered stage execution.

use super::StageSpec;
use crate::cancellation::CancellationToken;
use crate::core::{Outcome, RunState, SequenceReport, StageRecord};
use crate::events::{names, EventSink};
use crate::stages::StageContext;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A validated, ordered list of stages ready to run once.
pub struct Sequencer {
    name: String,
    stages: Vec<StageSpec>,
    token: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
    cancel_grace: Duration,
}

impl Sequencer {
    pub(super) fn new(
        name: String,
        stages: Vec<StageSpec>,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            name,
            stages,
            token,
            sink,
            cancel_grace,
        }
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

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the position of a stage in the execution order.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == stage)
    }

    /// Returns the declared dependencies of a stage.
    #[must_use]
    pub fn depends_on(&self, stage: &str) -> Option<&[String]> {
        self.spec(stage).map(|s| s.depends_on.as_slice())
    }

    /// Returns whether a stage is fatal.
    #[must_use]
    pub fn is_fatal(&self, stage: &str) -> Option<bool> {
        self.spec(stage).map(|s| s.fatal)
    }

    /// Returns the cancellation token observed by this run.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    fn spec(&self, stage: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == stage)
    }

    /// Runs every stage in order and returns the report.
    ///
    /// A fatal stage that fails stops the run: remaining stages are recorded
    /// as [`Outcome::NotRun`] and the state is [`RunState::Aborted`].
    /// Non-fatal failures and degradations are logged and the run continues.
    /// Cancellation interrupts the in-progress stage and aborts the run.
    pub async fn run(self) -> SequenceReport {
        let mut report = SequenceReport::new(&self.name);
        report.state = RunState::Running;

        info!(
            sequence = %self.name,
            run_id = %report.run_id,
            stages = self.stages.len(),
            "Starting sequence"
        );
        self.sink
            .emit(
                names::RUN_STARTED,
                Some(serde_json::json!({
                    "sequence": self.name,
                    "run_id": report.run_id.to_string(),
                    "stages": self.execution_order(),
                })),
            )
            .await;

        let mut aborted = false;
        let mut warnings = false;

        for spec in &self.stages {
            if aborted {
                report.records.push(StageRecord::not_run(&spec.name, spec.fatal));
                continue;
            }

            if self.token.is_cancelled() {
                warn!(
                    sequence = %self.name,
                    stage = %spec.name,
                    reason = ?self.token.reason(),
                    "Run cancelled before stage started"
                );
                aborted = true;
                report.records.push(StageRecord::not_run(&spec.name, spec.fatal));
                continue;
            }

            if let Some(reason) = &spec.skip {
                info!(stage = %spec.name, reason = %reason, "Skipping stage");
                let outcome = Outcome::Skipped(reason.clone());
                self.emit_outcome(spec, &outcome, 0.0).await;
                report.records.push(StageRecord {
                    name: spec.name.clone(),
                    outcome,
                    fatal: spec.fatal,
                    started_at: None,
                    duration_ms: None,
                });
                continue;
            }

            for dep in &spec.depends_on {
                if let Some(outcome) = report.outcome(dep) {
                    if outcome.is_warning() {
                        warn!(
                            stage = %spec.name,
                            dependency = %dep,
                            dependency_outcome = outcome.label(),
                            "Dependency did not fully succeed; continuing"
                        );
                    }
                }
            }

            let record = self.run_stage(spec).await;
            match &record.outcome {
                Outcome::Success | Outcome::Skipped(_) | Outcome::NotRun => {}
                Outcome::Degraded(_) => warnings = true,
                Outcome::Failure(_) => {
                    warnings = true;
                    if spec.fatal {
                        aborted = true;
                    }
                }
                Outcome::Interrupted => aborted = true,
            }
            report.records.push(record);
        }

        report.state = if aborted {
            RunState::Aborted
        } else if warnings {
            RunState::CompletedWithWarnings
        } else {
            RunState::Completed
        };
        report.finished_at = Some(Utc::now());

        info!(
            sequence = %self.name,
            run_id = %report.run_id,
            state = %report.state,
            executed = report.executed_count(),
            "Sequence finished"
        );
        self.sink
            .emit(
                names::RUN_FINISHED,
                Some(serde_json::json!({
                    "sequence": self.name,
                    "run_id": report.run_id.to_string(),
                    "state": report.state,
                })),
            )
            .await;

        report
    }

    async fn run_stage(&self, spec: &StageSpec) -> StageRecord {
        info!(stage = %spec.name, fatal = spec.fatal, "Starting stage");
        self.sink
            .emit(
                names::STAGE_STARTED,
                Some(serde_json::json!({
                    "sequence": self.name,
                    "stage": spec.name,
                    "fatal": spec.fatal,
                })),
            )
            .await;

        let ctx = StageContext::new(&spec.name, self.token.clone(), self.sink.clone());
        let started_at = Utc::now();
        let start = Instant::now();

        let execution = spec.runner.execute(&ctx);
        tokio::pin!(execution);
        let mut outcome = tokio::select! {
            outcome = &mut execution => outcome,
            () = self.token.cancelled() => {
                // The stage gets until its next wait point to stop on its own.
                let grace = tokio::time::timeout(self.cancel_grace, &mut execution).await;
                grace.unwrap_or_else(|_| {
                    warn!(
                        stage = %spec.name,
                        grace_ms = u64::try_from(self.cancel_grace.as_millis()).unwrap_or(u64::MAX),
                        "Stage did not stop within the cancellation grace period"
                    );
                    Outcome::Interrupted
                })
            }
        };
        if self.token.is_cancelled() && !outcome.is_success() {
            outcome = Outcome::Interrupted;
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.log_outcome(spec, &outcome, duration_ms);
        self.emit_outcome(spec, &outcome, duration_ms).await;

        StageRecord {
            name: spec.name.clone(),
            outcome,
            fatal: spec.fatal,
            started_at: Some(started_at),
            duration_ms: Some(duration_ms),
        }
    }

    fn log_outcome(&self, spec: &StageSpec, outcome: &Outcome, duration_ms: f64) {
        match outcome {
            Outcome::Success => {
                info!(stage = %spec.name, duration_ms, "Stage completed");
            }
            Outcome::Degraded(reason) => {
                warn!(stage = %spec.name, duration_ms, reason = %reason, "Stage degraded");
            }
            Outcome::Failure(reason) if spec.fatal => {
                error!(
                    stage = %spec.name,
                    duration_ms,
                    reason = %reason,
                    "Fatal stage failed; aborting sequence"
                );
            }
            Outcome::Failure(reason) => {
                warn!(
                    stage = %spec.name,
                    duration_ms,
                    reason = %reason,
                    "Stage failed; continuing"
                );
            }
            Outcome::Interrupted => {
                warn!(
                    stage = %spec.name,
                    duration_ms,
                    reason = ?self.token.reason(),
                    "Stage interrupted"
                );
            }
            Outcome::Skipped(reason) => {
                info!(stage = %spec.name, reason = %reason, "Stage skipped");
            }
            Outcome::NotRun => {}
        }
    }

    async fn emit_outcome(&self, spec: &StageSpec, outcome: &Outcome, duration_ms: f64) {
        let event_type = match outcome {
            Outcome::Success => names::STAGE_COMPLETED,
            Outcome::Degraded(_) => names::STAGE_DEGRADED,
            Outcome::Failure(_) => names::STAGE_FAILED,
            Outcome::Skipped(_) | Outcome::NotRun => names::STAGE_SKIPPED,
            Outcome::Interrupted => names::STAGE_INTERRUPTED,
        };
        self.sink
            .emit(
                event_type,
                Some(serde_json::json!({
                    "sequence": self.name,
                    "stage": spec.name,
                    "fatal": spec.fatal,
                    "outcome": outcome.label(),
                    "reason": outcome.reason(),
                    "duration_ms": duration_ms,
                })),
            )
            .await;
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("name", &self.name)
            .field("stages", &self.execution_order())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
