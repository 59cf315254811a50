//! Docker daemon checks and leftover-resource cleanup.

use super::{CommandRunner, Invocation};
use crate::errors::ToolError;
use std::sync::Arc;

/// `docker` CLI wrapper.
#[derive(Debug, Clone)]
pub struct Docker {
    runner: Arc<dyn CommandRunner>,
}

impl Docker {
    /// Creates a wrapper.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Succeeds if the daemon answers; returns its server version.
    pub async fn info(&self) -> Result<String, ToolError> {
        let stdout = self
            .runner
            .run_ok(&Invocation::new("docker").args(["info", "--format", "{{.ServerVersion}}"]))
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn ids(&self, args: &[&str]) -> Result<Vec<String>, ToolError> {
        let stdout = self
            .runner
            .run_ok(&Invocation::new("docker").args(args.iter().copied()))
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Lists containers, running or not, carrying `label`.
    pub async fn containers_with_label(&self, label: &str) -> Result<Vec<String>, ToolError> {
        let filter = format!("label={label}");
        self.ids(&["ps", "-a", "-q", "--filter", filter.as_str()]).await
    }

    /// Lists volumes carrying `label`.
    pub async fn volumes_with_label(&self, label: &str) -> Result<Vec<String>, ToolError> {
        let filter = format!("label={label}");
        self.ids(&["volume", "ls", "-q", "--filter", filter.as_str()]).await
    }

    /// Force-removes containers.
    pub async fn remove_containers(&self, ids: &[String]) -> Result<(), ToolError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.runner
            .run_ok(&Invocation::new("docker").args(["rm", "-f"]).args(ids.iter().cloned()))
            .await?;
        Ok(())
    }

    /// Force-removes volumes.
    pub async fn remove_volumes(&self, names: &[String]) -> Result<(), ToolError> {
        if names.is_empty() {
            return Ok(());
        }
        self.runner
            .run_ok(
                &Invocation::new("docker")
                    .args(["volume", "rm", "-f"])
                    .args(names.iter().cloned()),
            )
            .await?;
        Ok(())
    }

    /// Returns true if a network named exactly `name` exists.
    pub async fn network_exists(&self, name: &str) -> Result<bool, ToolError> {
        let stdout = self
            .runner
            .run_ok(&Invocation::new("docker").args(["network", "ls", "--format", "{{.Name}}"]))
            .await?;
        Ok(stdout.lines().map(str::trim).any(|line| line == name))
    }

    /// Returns the number of containers attached to a network.
    pub async fn network_attachments(&self, name: &str) -> Result<usize, ToolError> {
        let inv = Invocation::new("docker").args([
            "network",
            "inspect",
            name,
            "--format",
            "{{len .Containers}}",
        ]);
        let stdout = self.runner.run_ok(&inv).await?;
        stdout
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ToolError::parse(inv.display(), e.to_string()))
    }

    /// Removes a network.
    pub async fn remove_network(&self, name: &str) -> Result<(), ToolError> {
        self.runner
            .run_ok(&Invocation::new("docker").args(["network", "rm", name]))
            .await?;
        Ok(())
    }
}
