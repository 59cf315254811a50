//! Kind cluster lifecycle.

use super::{CommandRunner, Invocation};
use crate::errors::ToolError;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Label kind puts on every node container of a cluster.
pub const CLUSTER_LABEL: &str = "io.x-k8s.kind.cluster";

/// Name of the docker network kind creates for its clusters.
pub const KIND_NETWORK: &str = "kind";

/// A named kind cluster.
#[derive(Debug, Clone)]
pub struct KindCluster {
    runner: Arc<dyn CommandRunner>,
    name: String,
}

impl KindCluster {
    /// Creates a handle for the cluster `name`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, name: impl Into<String>) -> Self {
        Self {
            runner,
            name: name.into(),
        }
    }

    /// Returns the cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the kubeconfig context, cluster and user name kind writes.
    #[must_use]
    pub fn context_name(&self) -> String {
        format!("kind-{}", self.name)
    }

    /// Returns the docker label filter matching this cluster's containers.
    #[must_use]
    pub fn label_filter(&self) -> String {
        format!("{CLUSTER_LABEL}={}", self.name)
    }

    /// Lists existing kind clusters.
    pub async fn list(&self) -> Result<BTreeSet<String>, ToolError> {
        let stdout = self
            .runner
            .run_ok(&Invocation::new("kind").args(["get", "clusters"]))
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Returns true if this cluster exists.
    pub async fn exists(&self) -> Result<bool, ToolError> {
        Ok(self.list().await?.contains(&self.name))
    }

    /// Creates the cluster from a kind config file, waiting up to `wait` for
    /// the control plane.
    pub async fn create(&self, config: &Path, wait: Duration) -> Result<(), ToolError> {
        self.runner
            .run_ok(&Invocation::new("kind").args([
                "create".to_string(),
                "cluster".to_string(),
                "--name".to_string(),
                self.name.clone(),
                "--config".to_string(),
                config.display().to_string(),
                "--wait".to_string(),
                format!("{}s", wait.as_secs()),
            ]))
            .await?;
        Ok(())
    }

    /// Deletes the cluster.
    pub async fn delete(&self) -> Result<(), ToolError> {
        let invocation =
            Invocation::new("kind").args(["delete", "cluster", "--name", self.name.as_str()]);
        self.runner.run_ok(&invocation).await?;
        Ok(())
    }
}
