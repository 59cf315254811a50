//! Post-hoc status probe.
//!
//! The probe reads the external system directly instead of trusting the
//! run report.

use super::Environment;
use crate::tools::{DeploymentStatus, Release};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// State of one awaited deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Deployment name.
    pub name: String,
    /// Replica counts, `None` if the deployment does not exist.
    pub status: Option<DeploymentStatus>,
}

impl DeploymentState {
    /// Returns true if every desired replica is available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status.is_some_and(|s| s.is_available())
    }
}

/// Result of requesting an ingress host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Requested URL.
    pub url: String,
    /// HTTP status code, if a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Request error, if none did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EndpointStatus {
    /// Returns true if the host answered at all.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.http_status.is_some()
    }
}

/// State of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Stage name.
    pub stage: String,
    /// Helm release name.
    pub release: String,
    /// Namespace.
    pub namespace: String,
    /// Whether the service is enabled in the configuration.
    pub enabled: bool,
    /// Helm release status, `None` if not installed.
    pub release_status: Option<String>,
    /// Awaited deployments.
    pub deployments: Vec<DeploymentState>,
    /// HTTP reachability of the service's ingress host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointStatus>,
}

impl ServiceStatus {
    /// Returns true if the release is deployed and everything it exposes is
    /// up. Disabled services are always healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.enabled
            || (self.release_status.as_deref() == Some("deployed")
                && self.deployments.iter().all(DeploymentState::is_available)
                && self.endpoint.as_ref().map_or(true, EndpointStatus::is_reachable))
    }
}

/// Snapshot of the whole environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    /// Cluster name.
    pub cluster: String,
    /// Whether kind reports the cluster.
    pub cluster_present: bool,
    /// Nodes reporting `Ready`.
    pub nodes_ready: usize,
    /// All nodes.
    pub nodes_total: usize,
    /// Per-service state, in install order.
    pub services: Vec<ServiceStatus>,
    /// Errors encountered while probing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl EnvironmentStatus {
    /// Returns true if the cluster is up and every service is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.cluster_present
            && self.nodes_total > 0
            && self.nodes_ready == self.nodes_total
            && self.services.iter().all(ServiceStatus::is_healthy)
    }
}

impl Environment {
    /// Inspects the cluster, its nodes and every configured service.
    pub async fn status(&self) -> EnvironmentStatus {
        let config = self.config();
        let mut status = EnvironmentStatus {
            cluster: config.cluster_name.clone(),
            cluster_present: false,
            nodes_ready: 0,
            nodes_total: 0,
            services: Vec::new(),
            errors: Vec::new(),
        };

        match self.kind().exists().await {
            Ok(present) => status.cluster_present = present,
            Err(e) => status.errors.push(e.to_string()),
        }

        let kubectl = self.kubectl();
        let mut releases: Vec<Release> = Vec::new();
        if status.cluster_present {
            match kubectl.nodes_ready().await {
                Ok((ready, total)) => {
                    status.nodes_ready = ready;
                    status.nodes_total = total;
                }
                Err(e) => status.errors.push(e.to_string()),
            }
            match self.helm().releases(None).await {
                Ok(found) => releases = found,
                Err(e) => status.errors.push(e.to_string()),
            }
        }

        for svc in &config.services {
            let release_status = releases
                .iter()
                .find(|r| r.name == svc.release && r.namespace == svc.namespace)
                .map(|r| r.status.clone());

            let mut deployments = Vec::with_capacity(svc.deployments.len());
            for name in &svc.deployments {
                let deployment = if status.cluster_present {
                    match kubectl.deployment_status(name, &svc.namespace).await {
                        Ok(found) => found,
                        Err(e) => {
                            status.errors.push(e.to_string());
                            None
                        }
                    }
                } else {
                    None
                };
                deployments.push(DeploymentState {
                    name: name.clone(),
                    status: deployment,
                });
            }

            let endpoint = match config.hostname(svc) {
                Some(host) if config.http_probe && svc.enabled && status.cluster_present => {
                    probe_endpoint(&host).await
                }
                _ => None,
            };

            status.services.push(ServiceStatus {
                stage: svc.stage.clone(),
                release: svc.release.clone(),
                namespace: svc.namespace.clone(),
                enabled: svc.enabled,
                release_status,
                deployments,
                endpoint,
            });
        }

        debug!(
            cluster = %status.cluster,
            present = status.cluster_present,
            healthy = status.is_healthy(),
            "Probed environment status"
        );
        status
    }
}

#[cfg(feature = "http-probe")]
async fn probe_endpoint(host: &str) -> Option<EndpointStatus> {
    let url = format!("http://{host}/");
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let (http_status, error) = match client.get(&url).send().await {
        Ok(response) => (Some(response.status().as_u16()), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Some(EndpointStatus {
        url,
        http_status,
        error,
    })
}

#[cfg(not(feature = "http-probe"))]
async fn probe_endpoint(_host: &str) -> Option<EndpointStatus> {
    None
}
