//! Idempotent removals backing the teardown plan.

use crate::errors::ProvisionError;
use crate::sequencer::Cleanup;
use crate::tools::{Docker, Helm, KindCluster, KubeconfigEntries};
use async_trait::async_trait;
use tracing::{debug, info};

/// Uninstalls one Helm release. Absent when the cluster is gone.
#[derive(Debug)]
pub struct HelmReleaseCleanup {
    name: String,
    kind: KindCluster,
    helm: Helm,
    release: String,
    namespace: String,
}

impl HelmReleaseCleanup {
    /// Creates the step.
    #[must_use]
    pub fn new(kind: KindCluster, helm: Helm, release: &str, namespace: &str) -> Self {
        Self {
            name: format!("helm-{release}"),
            kind,
            helm,
            release: release.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl Cleanup for HelmReleaseCleanup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        if !self.kind.exists().await? {
            debug!(release = %self.release, "Cluster absent; release cannot exist");
            return Ok(false);
        }
        Ok(self.helm.release_exists(&self.release, &self.namespace).await?)
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        self.helm.uninstall(&self.release, &self.namespace).await?;
        info!(release = %self.release, namespace = %self.namespace, "Uninstalled release");
        Ok(())
    }
}

/// Deletes the kind cluster.
#[derive(Debug)]
pub struct ClusterCleanup {
    kind: KindCluster,
}

impl ClusterCleanup {
    /// Creates the step.
    #[must_use]
    pub fn new(kind: KindCluster) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Cleanup for ClusterCleanup {
    fn name(&self) -> &str {
        "kind-cluster"
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        Ok(self.kind.exists().await?)
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        self.kind.delete().await?;
        info!(cluster = %self.kind.name(), "Deleted kind cluster");
        Ok(())
    }
}

/// Removes the cluster's kubeconfig context, cluster and user entries.
#[derive(Debug)]
pub struct KubeconfigCleanup {
    entries: KubeconfigEntries,
}

impl KubeconfigCleanup {
    /// Creates the step.
    #[must_use]
    pub fn new(entries: KubeconfigEntries) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl Cleanup for KubeconfigCleanup {
    fn name(&self) -> &str {
        "kubeconfig-entries"
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        Ok(self.entries.presence().await?.any())
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        let removed = self.entries.delete().await?;
        info!(
            kubeconfig = %self.entries.kubeconfig().display(),
            entry = %self.entries.name(),
            context = removed.context,
            cluster = removed.cluster,
            user = removed.user,
            "Removed kubeconfig entries"
        );
        Ok(())
    }
}

/// Which labelled docker objects a [`DockerLeftovers`] step removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeftoverKind {
    /// Containers, running or stopped.
    Containers,
    /// Volumes.
    Volumes,
}

/// Removes docker containers or volumes still carrying the cluster label.
#[derive(Debug)]
pub struct DockerLeftovers {
    docker: Docker,
    kind: LeftoverKind,
    label: String,
}

impl DockerLeftovers {
    /// Creates the step.
    #[must_use]
    pub fn new(docker: Docker, kind: LeftoverKind, label: impl Into<String>) -> Self {
        Self {
            docker,
            kind,
            label: label.into(),
        }
    }

    async fn list(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(match self.kind {
            LeftoverKind::Containers => self.docker.containers_with_label(&self.label).await?,
            LeftoverKind::Volumes => self.docker.volumes_with_label(&self.label).await?,
        })
    }
}

#[async_trait]
impl Cleanup for DockerLeftovers {
    fn name(&self) -> &str {
        match self.kind {
            LeftoverKind::Containers => "docker-containers",
            LeftoverKind::Volumes => "docker-volumes",
        }
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        Ok(!self.list().await?.is_empty())
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        let ids = self.list().await?;
        match self.kind {
            LeftoverKind::Containers => self.docker.remove_containers(&ids).await?,
            LeftoverKind::Volumes => self.docker.remove_volumes(&ids).await?,
        }
        info!(step = self.name(), count = ids.len(), label = %self.label, "Removed leftovers");
        Ok(())
    }
}

/// Removes the kind docker network once nothing is attached to it.
#[derive(Debug)]
pub struct NetworkCleanup {
    docker: Docker,
    network: String,
}

impl NetworkCleanup {
    /// Creates the step.
    #[must_use]
    pub fn new(docker: Docker, network: impl Into<String>) -> Self {
        Self {
            docker,
            network: network.into(),
        }
    }
}

#[async_trait]
impl Cleanup for NetworkCleanup {
    fn name(&self) -> &str {
        "docker-network"
    }

    async fn present(&self) -> Result<bool, ProvisionError> {
        if !self.docker.network_exists(&self.network).await? {
            return Ok(false);
        }
        let attached = self.docker.network_attachments(&self.network).await?;
        if attached > 0 {
            info!(network = %self.network, attached, "Network still in use; keeping it");
            return Ok(false);
        }
        Ok(true)
    }

    async fn remove(&self) -> Result<(), ProvisionError> {
        self.docker.remove_network(&self.network).await?;
        info!(network = %self.network, "Removed docker network");
        Ok(())
    }
}
