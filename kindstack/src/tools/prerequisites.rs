//! Host prerequisite checks.

use super::{CommandRunner, Docker};
use crate::errors::ProvisionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Programs that must be on `PATH`, with install hints.
pub const REQUIRED_TOOLS: [(&str, &str); 4] = [
    ("docker", "Install Docker: https://docs.docker.com/get-docker/"),
    (
        "kind",
        "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
    ),
    ("kubectl", "Install kubectl: https://kubernetes.io/docs/tasks/tools/"),
    ("helm", "Install helm: https://helm.sh/docs/intro/install/"),
];

/// Result of checking one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCheck {
    /// Program name.
    pub tool: String,
    /// Whether it resolves on `PATH`.
    pub found: bool,
    /// Install hint.
    pub hint: String,
}

/// Result of the full prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteReport {
    /// Per-program results.
    pub tools: Vec<ToolCheck>,
    /// Whether the docker daemon answered.
    pub docker_running: bool,
    /// Daemon error, if it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_error: Option<String>,
}

impl PrerequisiteReport {
    /// Returns true if every program is present and docker is running.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.docker_running && self.tools.iter().all(|t| t.found)
    }

    /// Returns the names of missing programs.
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| !t.found)
            .map(|t| t.tool.as_str())
            .collect()
    }

    /// Converts an unsatisfied report into a [`ProvisionError::PreconditionMissing`].
    pub fn into_result(self) -> Result<(), ProvisionError> {
        if self.is_satisfied() {
            return Ok(());
        }
        let mut problems: Vec<String> = self
            .tools
            .iter()
            .filter(|t| !t.found)
            .map(|t| format!("{} not found ({})", t.tool, t.hint))
            .collect();
        if !self.docker_running && self.tools.iter().any(|t| t.tool == "docker" && t.found) {
            problems.push(format!(
                "docker daemon not running: {}",
                self.docker_error.as_deref().unwrap_or("no response")
            ));
        }
        Err(ProvisionError::PreconditionMissing(problems.join("; ")))
    }
}

/// Checks every required program and the docker daemon.
pub async fn check_prerequisites(runner: Arc<dyn CommandRunner>) -> PrerequisiteReport {
    let mut tools = Vec::with_capacity(REQUIRED_TOOLS.len());
    for (tool, hint) in REQUIRED_TOOLS {
        let found = runner.has_program(tool).await;
        if found {
            info!(tool, "Found prerequisite");
        } else {
            warn!(tool, hint, "Missing prerequisite");
        }
        tools.push(ToolCheck {
            tool: tool.to_string(),
            found,
            hint: hint.to_string(),
        });
    }

    let docker_found = tools.iter().any(|t| t.tool == "docker" && t.found);
    let (docker_running, docker_error) = if docker_found {
        match Docker::new(runner).info().await {
            Ok(version) => {
                info!(version = %version, "Docker daemon is running");
                (true, None)
            }
            Err(e) => {
                warn!(error = %e, "Docker daemon is not reachable");
                (false, Some(e.to_string()))
            }
        }
    } else {
        (false, Some("docker not installed".to_string()))
    };

    PrerequisiteReport {
        tools,
        docker_running,
        docker_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    #[tokio::test]
    async fn test_all_present() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout("docker info", "27.1.1\n");

        let report = check_prerequisites(runner.clone()).await;

        assert!(report.is_satisfied());
        assert!(report.clone().into_result().is_ok());
        assert_eq!(runner.count("which"), 4);
    }

    #[tokio::test]
    async fn test_missing_tool_is_precondition_error() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_fail("which helm", "");

        let report = check_prerequisites(runner).await;

        assert_eq!(report.missing(), vec!["helm"]);
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ProvisionError::PreconditionMissing(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("helm not found"));
    }

    #[tokio::test]
    async fn test_docker_daemon_down() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_fail("docker info", "Cannot connect to the Docker daemon");

        let report = check_prerequisites(runner).await;

        assert!(!report.docker_running);
        assert!(report.missing().is_empty());
        assert!(report
            .into_result()
            .unwrap_err()
            .to_string()
            .contains("docker daemon not running"));
    }
}
