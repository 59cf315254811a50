//! Sequence report produced by one run.

use super::{Outcome, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The recorded outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// Whether a failure of this stage halts the run.
    pub fatal: bool,
    /// When the stage started, if it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, if it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl StageRecord {
    /// Creates a record for a stage that never started.
    #[must_use]
    pub fn not_run(name: impl Into<String>, fatal: bool) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::NotRun,
            fatal,
            started_at: None,
            duration_ms: None,
        }
    }
}

/// Ordered list of stage outcomes for one run, plus the final run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Name of the sequence (e.g. "provision", "teardown").
    pub sequence: String,
    /// Final run state.
    pub state: RunState,
    /// Stage records in execution order.
    pub records: Vec<StageRecord>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SequenceReport {
    /// Creates an empty report in the `NotStarted` state.
    #[must_use]
    pub fn new(sequence: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sequence: sequence.into(),
            state: RunState::NotStarted,
            records: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns `(stage name, outcome)` pairs in execution order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(&str, &Outcome)> {
        self.records
            .iter()
            .map(|r| (r.name.as_str(), &r.outcome))
            .collect()
    }

    /// Returns the outcome of the named stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&Outcome> {
        self.records
            .iter()
            .find(|r| r.name == stage)
            .map(|r| &r.outcome)
    }

    /// Returns the records that ended in failure or degradation.
    #[must_use]
    pub fn warnings(&self) -> Vec<&StageRecord> {
        self.records.iter().filter(|r| r.outcome.is_warning()).collect()
    }

    /// Returns the number of stages that actually ran.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !matches!(r.outcome, Outcome::NotRun | Outcome::Skipped(_)))
            .count()
    }

    /// Returns the process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, outcome: Outcome) -> StageRecord {
        StageRecord {
            name: name.to_string(),
            outcome,
            fatal: false,
            started_at: Some(Utc::now()),
            duration_ms: Some(1.0),
        }
    }

    #[test]
    fn test_outcome_lookup() {
        let mut report = SequenceReport::new("provision");
        report.records.push(record("cluster", Outcome::Success));
        report.records.push(record("dns", Outcome::degraded("no address")));
        report.records.push(StageRecord::not_run("forge", false));

        assert_eq!(report.outcome("cluster"), Some(&Outcome::Success));
        assert_eq!(report.outcome("missing"), None);
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.executed_count(), 2);
        assert_eq!(
            report.outcomes().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["cluster", "dns", "forge"]
        );
    }

    #[test]
    fn test_json_rendering() {
        let mut report = SequenceReport::new("teardown");
        report.state = RunState::Completed;
        report.records.push(StageRecord::not_run("kind-cluster", false));

        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "completed");
        assert_eq!(value["records"][0]["outcome"]["status"], "not_run");
        assert!(value["records"][0].get("started_at").is_none());
    }
}
