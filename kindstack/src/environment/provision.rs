//! Provisioning stages of the dev environment.

use super::timeout_outcome;
use crate::config::{EnvConfig, ServiceSpec};
use crate::core::Outcome;
use crate::errors::ProvisionError;
use crate::readiness::{diagnostic, CompoundReadiness, Condition, Poller};
use crate::sequencer::with_retry;
use crate::stages::{Stage, StageContext};
use crate::tools::{
    check_prerequisites, resolve_chart, ChartRef, CommandRunner, Helm, KindCluster, Kubectl,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the object used by the admission webhook probe.
pub const WEBHOOK_PROBE_NAME: &str = "kindstack-webhook-probe";

/// Checks that every required program is installed and docker is running.
#[derive(Debug)]
pub struct PrerequisitesStage {
    runner: Arc<dyn CommandRunner>,
}

impl PrerequisitesStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Stage for PrerequisitesStage {
    fn name(&self) -> &str {
        "prerequisites"
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        ctx.emit_progress("checking docker, kind, kubectl and helm");
        Outcome::from_result(check_prerequisites(self.runner.clone()).await.into_result())
    }
}

/// Creates the kind cluster unless it already exists, then waits for its
/// nodes.
#[derive(Debug)]
pub struct ClusterStage {
    config: Arc<EnvConfig>,
    kind: KindCluster,
    kubectl: Kubectl,
}

impl ClusterStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: Arc<EnvConfig>, kind: KindCluster, kubectl: Kubectl) -> Self {
        Self {
            config,
            kind,
            kubectl,
        }
    }

    async fn create(&self, ctx: &StageContext) -> Outcome {
        let config_path = &self.config.kind_config;
        if !config_path.is_file() {
            return Outcome::from_result(Err(ProvisionError::missing_file(
                "kind cluster config",
                config_path,
            )));
        }

        ctx.emit_progress(format!("creating cluster {}", self.kind.name()));
        let (kind, wait) = (&self.kind, self.config.cluster_wait());
        let created = with_retry(&self.config.retry, "create kind cluster", &ctx.token, || {
            async move {
                // A failed attempt can leave half-created node containers.
                if kind.exists().await? {
                    kind.delete().await?;
                }
                kind.create(config_path, wait).await.map_err(ProvisionError::from)
            }
        })
        .await;

        match created {
            Ok(()) => {
                info!(cluster = %self.kind.name(), "Created kind cluster");
                Outcome::Success
            }
            Err(failure) => failure.into_outcome(),
        }
    }
}

#[async_trait]
impl Stage for ClusterStage {
    fn name(&self) -> &str {
        "cluster"
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        let kind = &self.kind;
        let exists = with_retry(&self.config.retry, "list kind clusters", &ctx.token, || {
            async move { kind.exists().await.map_err(ProvisionError::from) }
        })
        .await;

        match exists {
            Err(failure) => return failure.into_outcome(),
            Ok(true) => {
                info!(cluster = %kind.name(), "Cluster already present");
                ctx.emit_progress(format!("cluster {} already present", kind.name()));
            }
            Ok(false) => {
                let outcome = self.create(ctx).await;
                if !outcome.is_success() {
                    return outcome;
                }
            }
        }

        let check = &self.config.readiness;
        let kubectl = &self.kubectl;
        let result = Poller::from_check("cluster nodes", check, &ctx.token)
            .wait(|| async move {
                matches!(
                    kubectl.nodes_ready().await,
                    Ok((ready, total)) if total > 0 && ready == total
                )
            })
            .await;
        timeout_outcome(result, check.on_timeout, "cluster nodes", check.timeout())
    }
}

/// Installs one Helm release and waits for it.
#[derive(Debug)]
pub struct ServiceStage {
    config: Arc<EnvConfig>,
    service: ServiceSpec,
    helm: Helm,
    kubectl: Kubectl,
    webhook: Option<CompoundReadiness>,
}

impl ServiceStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: Arc<EnvConfig>, service: ServiceSpec, helm: Helm, kubectl: Kubectl) -> Self {
        Self {
            config,
            service,
            helm,
            kubectl,
            webhook: None,
        }
    }

    /// Adds a compound readiness check run after the deployments are
    /// available.
    #[must_use]
    pub fn with_webhook(mut self, webhook: CompoundReadiness) -> Self {
        self.webhook = Some(webhook);
        self
    }

    async fn install(&self, ctx: &StageContext) -> Outcome {
        let svc = &self.service;
        let values = self.config.values_path(svc);
        if let Some(path) = &values {
            if !path.is_file() {
                return Outcome::from_result(Err(ProvisionError::missing_file("values file", path)));
            }
        }

        let Some(chart) = resolve_chart(
            self.config.charts_dir.as_deref(),
            &svc.chart,
            svc.repo_name.as_deref(),
            svc.repo_url.as_deref(),
        ) else {
            return Outcome::from_result(Err(ProvisionError::PreconditionMissing(format!(
                "chart {} has no local copy and no repository",
                svc.chart
            ))));
        };

        let (helm, policy, token) = (&self.helm, &self.config.retry, &ctx.token);
        if let ChartRef::Remote {
            repo_name,
            repo_url,
            ..
        } = &chart
        {
            let repo = with_retry(policy, "add chart repository", token, || async move {
                helm.ensure_repo(repo_name, repo_url).await.map_err(ProvisionError::from)
            })
            .await;
            if let Err(failure) = repo {
                return failure.into_outcome();
            }
        }

        info!(stage = %svc.stage, release = %svc.release, chart = %chart, "Installing release");
        ctx.emit_progress(format!("installing {} from {chart}", svc.release));

        let (chart, values, timeout) = (&chart, values.as_deref(), self.config.helm_timeout());
        let operation = format!("install {}", svc.release);
        let installed = with_retry(policy, &operation, token, || async move {
            helm.install_or_upgrade(&svc.release, chart, values, &svc.namespace, timeout)
                .await
                .map_err(ProvisionError::from)
        })
        .await;

        match installed {
            Ok(()) => Outcome::Success,
            Err(failure) => failure.into_outcome(),
        }
    }

    async fn await_deployments(&self, ctx: &StageContext) -> Outcome {
        let svc = &self.service;
        let check = self.config.readiness_for(svc);
        let kubectl = &self.kubectl;

        for deployment in &svc.deployments {
            let what = format!("deployment {}/{deployment}", svc.namespace);
            let namespace = svc.namespace.as_str();
            let result = Poller::from_check(&what, check, &ctx.token)
                .on_timeout(diagnostic(move |name| async move {
                    let dump = kubectl.diagnostics(namespace).await;
                    warn!(condition = %name, diagnostics = %dump, "Collected diagnostics");
                }))
                .wait(|| async move {
                    matches!(
                        kubectl.deployment_status(deployment, namespace).await,
                        Ok(Some(status)) if status.is_available()
                    )
                })
                .await;

            let outcome = timeout_outcome(result, check.on_timeout, &what, check.timeout());
            if !outcome.is_success() {
                return outcome;
            }
        }
        Outcome::Success
    }

    async fn await_webhook(&self, webhook: &CompoundReadiness, ctx: &StageContext) -> Outcome {
        ctx.emit_progress("waiting for the admission webhook");
        let (kubectl, namespace) = (&self.kubectl, self.service.namespace.as_str());
        let result = webhook
            .wait(
                &ctx.token,
                Some(diagnostic(move |name| async move {
                    let dump = kubectl.diagnostics(namespace).await;
                    warn!(condition = %name, diagnostics = %dump, "Collected diagnostics");
                })),
            )
            .await;
        let settings = &self.config.webhook;
        timeout_outcome(
            result,
            settings.on_timeout,
            webhook.name(),
            settings.condition.timeout() + settings.probe.timeout(),
        )
    }
}

#[async_trait]
impl Stage for ServiceStage {
    fn name(&self) -> &str {
        &self.service.stage
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        let outcome = self.install(ctx).await;
        if !outcome.is_success() {
            return outcome;
        }

        let outcome = self.await_deployments(ctx).await;
        if !outcome.is_success() {
            return outcome;
        }

        match &self.webhook {
            Some(webhook) => self.await_webhook(webhook, ctx).await,
            None => {
                info!(
                    stage = %self.service.stage,
                    release = %self.service.release,
                    "Release ready"
                );
                Outcome::Success
            }
        }
    }
}

/// Renders the Ingress object submitted with a server-side dry run to
/// exercise the admission webhook.
#[must_use]
pub fn probe_ingress_manifest(namespace: &str, domain: &str) -> String {
    format!(
        "apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {WEBHOOK_PROBE_NAME}
  namespace: {namespace}
spec:
  ingressClassName: nginx
  rules:
  - host: probe.{domain}
    http:
      paths:
      - path: /
        pathType: Prefix
        backend:
          service:
            name: {WEBHOOK_PROBE_NAME}
            port:
              number: 80
"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookPart {
    ControllerDeployment,
    AdmissionService,
    ControllerPodRunning,
    AdmissionEndpoints,
    DryRunIngress,
}

impl WebhookPart {
    fn label(self) -> &'static str {
        match self {
            Self::ControllerDeployment => "controller deployment exists",
            Self::AdmissionService => "admission service exists",
            Self::ControllerPodRunning => "controller pod running",
            Self::AdmissionEndpoints => "admission endpoints ready",
            Self::DryRunIngress => "dry-run ingress admitted",
        }
    }
}

#[derive(Debug)]
struct WebhookCondition {
    part: WebhookPart,
    config: Arc<EnvConfig>,
    kubectl: Kubectl,
    namespace: String,
}

#[async_trait]
impl Condition for WebhookCondition {
    fn name(&self) -> &str {
        self.part.label()
    }

    async fn holds(&self) -> bool {
        let (webhook, ns) = (&self.config.webhook, self.namespace.as_str());
        let result = match self.part {
            WebhookPart::ControllerDeployment => {
                self.kubectl
                    .exists("deployment", &webhook.controller_deployment, ns)
                    .await
            }
            WebhookPart::AdmissionService => {
                self.kubectl.exists("service", &webhook.admission_service, ns).await
            }
            WebhookPart::ControllerPodRunning => self
                .kubectl
                .pod_phases(&webhook.pod_selector, ns)
                .await
                .map(|phases| phases.iter().any(|p| p == "Running")),
            WebhookPart::AdmissionEndpoints => self
                .kubectl
                .endpoint_addresses(&webhook.admission_service, ns)
                .await
                .map(|count| count > 0),
            WebhookPart::DryRunIngress => self
                .kubectl
                .apply(&probe_ingress_manifest(ns, &self.config.domain), true)
                .await
                .map(|()| true),
        };
        result.unwrap_or_else(|e| {
            debug!(condition = self.part.label(), error = %e, "Condition check failed");
            false
        })
    }
}

/// Builds the ingress admission webhook readiness check: four declarative
/// conditions, a server-side dry-run probe, then the settle delay.
#[must_use]
pub fn webhook_readiness(
    config: &Arc<EnvConfig>,
    kubectl: &Kubectl,
    namespace: &str,
) -> CompoundReadiness {
    let part = |part: WebhookPart| -> Arc<dyn Condition> {
        Arc::new(WebhookCondition {
            part,
            config: config.clone(),
            kubectl: kubectl.clone(),
            namespace: namespace.to_string(),
        })
    };
    let settings = &config.webhook;
    CompoundReadiness::new("ingress admission webhook", settings.condition.clone())
        .condition(part(WebhookPart::ControllerDeployment))
        .condition(part(WebhookPart::AdmissionService))
        .condition(part(WebhookPart::ControllerPodRunning))
        .condition(part(WebhookPart::AdmissionEndpoints))
        .probe(part(WebhookPart::DryRunIngress), settings.probe.clone())
        .settle(settings.settle())
}
