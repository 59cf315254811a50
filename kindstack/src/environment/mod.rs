//! The Kind dev environment built on the sequencer.
//!
//! [`Environment`] binds an [`EnvConfig`] to a [`CommandRunner`] and turns
//! it into a provisioning plan, a teardown plan, and a status probe.
//!
//! Provisioning order: prerequisites, cluster, ingress, dns, then the
//! remaining services in configuration order (LDAP before OIDC, then
//! monitoring, GitOps and the forge by default).

mod cleanup;
mod dns;
mod provision;
mod status;

pub use cleanup::{
    ClusterCleanup, DockerLeftovers, HelmReleaseCleanup, KubeconfigCleanup, LeftoverKind,
    NetworkCleanup,
};
pub use dns::{patch_corefile, CorefilePatch, DnsStage, COREFILE_KEY, HOSTS_BEGIN, HOSTS_END};
pub use provision::{
    probe_ingress_manifest, webhook_readiness, ClusterStage, PrerequisitesStage, ServiceStage,
    WEBHOOK_PROBE_NAME,
};
pub use status::{DeploymentState, EndpointStatus, EnvironmentStatus, ServiceStatus};

use crate::cancellation::CancellationToken;
use crate::config::{EnvConfig, INGRESS_STAGE};
use crate::core::Outcome;
use crate::errors::{ProvisionError, SequencerValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::readiness::{Readiness, TimeoutPolicy};
use crate::sequencer::{
    InventoryItem, Sequencer, SequencerBuilder, StageSpec, Teardown, TeardownGroup, TeardownScope,
};
use crate::tools::{
    CommandRunner, Docker, Helm, KindCluster, KubeconfigEntries, Kubectl, KIND_NETWORK,
};
use std::sync::Arc;
use std::time::Duration;

/// The dev environment described by one configuration.
#[derive(Debug, Clone)]
pub struct Environment {
    config: Arc<EnvConfig>,
    runner: Arc<dyn CommandRunner>,
}

impl Environment {
    /// Creates an environment.
    #[must_use]
    pub fn new(config: Arc<EnvConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Returns the command runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Returns the kind cluster handle.
    #[must_use]
    pub fn kind(&self) -> KindCluster {
        KindCluster::new(self.runner.clone(), &self.config.cluster_name)
    }

    /// Returns `kubectl` pinned to the cluster's context.
    #[must_use]
    pub fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.runner.clone()).with_context(self.config.context_name())
    }

    /// Returns `helm` pinned to the cluster's context.
    #[must_use]
    pub fn helm(&self) -> Helm {
        Helm::new(self.runner.clone()).with_context(self.config.context_name())
    }

    /// Returns the docker client.
    #[must_use]
    pub fn docker(&self) -> Docker {
        Docker::new(self.runner.clone())
    }

    /// Returns the cluster's kubeconfig entries.
    #[must_use]
    pub fn kubeconfig_entries(&self) -> KubeconfigEntries {
        KubeconfigEntries::new(
            self.runner.clone(),
            self.config.kubeconfig_path(),
            self.config.context_name(),
        )
    }

    /// Builds the provisioning sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if a service depends on a stage that is not declared
    /// before it.
    pub fn provisioning_plan(
        &self,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Sequencer, SequencerValidationError> {
        let config = &self.config;
        let mut builder = SequencerBuilder::new("provision")
            .with_token(token)
            .with_sink(sink);

        builder.add_stage(
            StageSpec::new(Arc::new(PrerequisitesStage::new(self.runner.clone()))).fatal(),
        )?;
        builder.add_stage(
            StageSpec::new(Arc::new(ClusterStage::new(
                config.clone(),
                self.kind(),
                self.kubectl(),
            )))
            .fatal()
            .after("prerequisites"),
        )?;

        for svc in &config.services {
            let kubectl = self.kubectl();
            let is_ingress = svc.stage == INGRESS_STAGE;
            let mut stage =
                ServiceStage::new(config.clone(), svc.clone(), self.helm(), kubectl.clone());
            if is_ingress {
                stage = stage.with_webhook(webhook_readiness(config, &kubectl, &svc.namespace));
            }

            let mut spec = StageSpec::new(Arc::new(stage))
                .with_fatal(svc.fatal)
                .after("cluster");
            for dep in &svc.after {
                spec = spec.after(dep.clone());
            }
            if !svc.enabled {
                spec = spec.skip_because("disabled in configuration");
            }
            builder.add_stage(spec)?;

            if is_ingress {
                let mut dns = StageSpec::new(Arc::new(DnsStage::new(config.clone(), kubectl)))
                    .non_fatal()
                    .after(INGRESS_STAGE);
                if !svc.enabled {
                    dns = dns.skip_because("ingress is disabled");
                }
                builder.add_stage(dns)?;
            }
        }

        builder.build()
    }

    /// Builds the teardown plan.
    ///
    /// Cluster group: Helm releases in reverse install order, then the
    /// cluster. Config group: kubeconfig entries. Resources group: labelled
    /// containers and volumes, then the kind network.
    #[must_use]
    pub fn teardown_plan(
        &self,
        token: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Teardown {
        let label = self.kind().label_filter();
        let mut plan = Teardown::new("teardown")
            .with_retry(self.config.retry.clone())
            .with_token(token)
            .with_sink(sink);

        for svc in self.config.services.iter().rev() {
            plan = plan.step(
                TeardownGroup::Cluster,
                Arc::new(HelmReleaseCleanup::new(
                    self.kind(),
                    self.helm(),
                    &svc.release,
                    &svc.namespace,
                )),
            );
        }

        plan.step(TeardownGroup::Cluster, Arc::new(ClusterCleanup::new(self.kind())))
            .step(
                TeardownGroup::Config,
                Arc::new(KubeconfigCleanup::new(self.kubeconfig_entries())),
            )
            .step(
                TeardownGroup::Resources,
                Arc::new(DockerLeftovers::new(self.docker(), LeftoverKind::Containers, &label)),
            )
            .step(
                TeardownGroup::Resources,
                Arc::new(DockerLeftovers::new(self.docker(), LeftoverKind::Volumes, &label)),
            )
            .step(
                TeardownGroup::Resources,
                Arc::new(NetworkCleanup::new(self.docker(), KIND_NETWORK)),
            )
    }

    /// Reports what a teardown of `scope` would remove.
    pub async fn inventory(&self, scope: TeardownScope) -> Vec<InventoryItem> {
        self.teardown_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink))
            .inventory(scope)
            .await
    }
}

/// Maps a readiness result onto a stage outcome, applying the timeout
/// policy.
pub(crate) fn timeout_outcome(
    result: Readiness,
    policy: TimeoutPolicy,
    what: &str,
    timeout: Duration,
) -> Outcome {
    match result {
        Readiness::Ready { .. } => Outcome::Success,
        Readiness::Cancelled => Outcome::Interrupted,
        Readiness::TimedOut { .. } => {
            let err = ProvisionError::NotReadyTimeout {
                what: what.to_string(),
                timeout,
            };
            match policy {
                TimeoutPolicy::Warn => Outcome::degraded(err.to_string()),
                TimeoutPolicy::Fail => Outcome::failure(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceSpec;
    use crate::core::RunState;
    use crate::events::CollectingEventSink;
    use crate::readiness::ReadinessCheck;
    use crate::sequencer::RetryPolicy;
    use crate::testing::FakeRunner;
    use crate::tools::CommandOutput;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const NODES: &str =
        r#"{"items": [{"status": {"conditions": [{"type": "Ready", "status": "True"}]}}]}"#;
    const AVAILABLE: &str =
        r#"{"spec": {"replicas": 1}, "status": {"readyReplicas": 1, "availableReplicas": 1}}"#;
    const SERVICE: &str = r#"{"spec": {"clusterIP": "10.96.0.50"}}"#;
    const ENDPOINTS: &str = r#"{"subsets": [{"addresses": [{"ip": "10.244.0.7"}]}]}"#;
    const COREDNS: &str =
        r#"{"data": {"Corefile": ".:53 {\n    errors\n    forward . /etc/resolv.conf\n}\n"}}"#;

    fn test_config(dir: &Path) -> EnvConfig {
        std::fs::write(dir.join("kind-config.yaml"), "kind: Cluster\n").unwrap();
        let quick = ReadinessCheck::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            TimeoutPolicy::Warn,
        );
        let mut config = EnvConfig {
            kind_config: dir.join("kind-config.yaml"),
            charts_dir: Some(dir.join("charts")),
            values_dir: dir.join("values"),
            kubeconfig: Some(dir.join("kubeconfig")),
            retry: RetryPolicy::new(2, Duration::from_millis(100), 2.0),
            readiness: quick.clone(),
            http_probe: false,
            ..EnvConfig::default()
        };
        config.webhook.condition = quick.clone();
        config.webhook.probe = quick.clone();
        config.dns.readiness = quick;
        config
    }

    fn healthy_runner() -> Arc<FakeRunner> {
        let runner = Arc::new(FakeRunner::new());
        runner
            .on_stdout("docker info", "27.1.1\n")
            .on_stdout("kubectl get nodes", NODES)
            .on_stdout("kubectl get deployment", AVAILABLE)
            .on_stdout("kubectl get service", SERVICE)
            .on_stdout("kubectl get pods", "Running")
            .on_stdout("kubectl get endpoints", ENDPOINTS)
            .on_stdout("kubectl get configmap coredns", COREDNS);
        runner
    }

    fn environment(config: EnvConfig, runner: &Arc<FakeRunner>) -> Environment {
        Environment::new(Arc::new(config), runner.clone())
    }

    async fn provision(env: &Environment) -> crate::core::SequenceReport {
        env.provisioning_plan(
            Arc::new(CancellationToken::new()),
            Arc::new(CollectingEventSink::new()),
        )
        .unwrap()
        .run()
        .await
    }

    #[test]
    fn test_plan_order_and_fatality() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let env = environment(test_config(dir.path()), &runner);

        let plan = env
            .provisioning_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink))
            .unwrap();

        assert_eq!(
            plan.execution_order(),
            [
                "prerequisites",
                "cluster",
                "ingress",
                "dns",
                "ldap",
                "oidc",
                "monitoring",
                "gitops",
                "forge"
            ]
        );
        for fatal in ["prerequisites", "cluster", "ingress"] {
            assert_eq!(plan.is_fatal(fatal), Some(true), "{fatal}");
        }
        for non_fatal in ["dns", "ldap", "oidc", "monitoring", "gitops", "forge"] {
            assert_eq!(plan.is_fatal(non_fatal), Some(false), "{non_fatal}");
        }
        assert_eq!(plan.depends_on("oidc").unwrap(), ["cluster", "ldap"]);
        assert_eq!(plan.depends_on("dns").unwrap(), ["ingress"]);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_plan_rejects_undeclared_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.services[1].after.push("forge".to_string());
        let env = environment(config, &Arc::new(FakeRunner::new()));

        let err = env
            .provisioning_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink))
            .unwrap_err();
        assert!(err.message.contains("forge"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_provision_completes() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        let env = environment(test_config(dir.path()), &runner);

        let report = provision(&env).await;

        assert_eq!(report.state, RunState::Completed, "{:?}", report.outcomes());
        assert_eq!(report.executed_count(), 9);
        assert_eq!(runner.count("kind create cluster --name kindstack"), 1);
        assert_eq!(runner.count("helm upgrade --install"), 6);
        assert_eq!(runner.count("helm repo add ingress-nginx"), 1);
        assert_eq!(
            runner.count("helm upgrade --install forgejo oci://code.forgejo.org/forgejo-helm/forgejo"),
            1
        );
        assert_eq!(runner.count("kubectl patch configmap coredns"), 1);
        assert_eq!(runner.count("kubectl rollout restart deployment/coredns"), 1);
        assert!(runner
            .stdin_of("kubectl apply")
            .unwrap()
            .contains(WEBHOOK_PROBE_NAME));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_cluster_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_stdout("kind get clusters", "kindstack\n");
        let mut config = test_config(dir.path());
        std::fs::remove_file(&config.kind_config).unwrap();
        config.services.clear();
        let env = environment(config, &runner);

        let report = provision(&env).await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(runner.count("kind create"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prerequisite_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_fail("which helm", "");
        let env = environment(test_config(dir.path()), &runner);

        let report = provision(&env).await;

        assert_eq!(report.state, RunState::Aborted);
        assert!(report.outcome("prerequisites").unwrap().is_failure());
        assert_eq!(report.outcome("cluster"), Some(&Outcome::NotRun));
        assert_eq!(report.outcome("forge"), Some(&Outcome::NotRun));
        assert_eq!(runner.count("kind"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_kind_config_aborts_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        let config = test_config(dir.path());
        std::fs::remove_file(&config.kind_config).unwrap();
        let env = environment(config, &runner);

        let report = provision(&env).await;

        assert_eq!(report.state, RunState::Aborted);
        let reason = report.outcome("cluster").unwrap().reason().unwrap().to_string();
        assert!(reason.contains("kind cluster config not found"), "{reason}");
        assert_eq!(runner.count("kind create"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_service_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_fail("helm upgrade --install dex", "Error: timed out waiting for the condition");
        let env = environment(test_config(dir.path()), &runner);

        let report = provision(&env).await;

        assert_eq!(report.state, RunState::CompletedWithWarnings);
        assert!(report.outcome("oidc").unwrap().is_failure());
        assert_eq!(report.outcome("monitoring"), Some(&Outcome::Success));
        assert_eq!(report.outcome("forge"), Some(&Outcome::Success));
        assert_eq!(runner.count("helm upgrade --install dex"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_values_file_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        let mut config = test_config(dir.path());
        config.services[2].values_file = Some("dex.yaml".into());
        let env = environment(config, &runner);

        let report = provision(&env).await;

        let reason = report.outcome("oidc").unwrap().reason().unwrap().to_string();
        assert!(reason.contains("values file not found"), "{reason}");
        assert_eq!(runner.count("helm upgrade --install dex"), 0);
        assert_eq!(report.state, RunState::CompletedWithWarnings);
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_probe_failure_degrades_ingress() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_fail(
            "kubectl apply",
            "failed calling webhook \"validate.nginx.ingress.kubernetes.io\"",
        );
        let env = environment(test_config(dir.path()), &runner);

        let report = provision(&env).await;

        assert!(matches!(report.outcome("ingress"), Some(Outcome::Degraded(_))));
        assert_eq!(report.state, RunState::CompletedWithWarnings);
        assert_eq!(runner.count("kubectl get events -n ingress-nginx"), 1);
        assert_eq!(report.outcome("forge"), Some(&Outcome::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_timeout_can_abort() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_fail("kubectl apply", "connection refused");
        let mut config = test_config(dir.path());
        config.webhook.on_timeout = TimeoutPolicy::Fail;
        let env = environment(config, &runner);

        let report = provision(&env).await;

        assert!(report.outcome("ingress").unwrap().is_failure());
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.outcome("dns"), Some(&Outcome::NotRun));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_service_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        let mut config = test_config(dir.path());
        config.services[4].enabled = false;
        let env = environment(config, &runner);

        let report = provision(&env).await;

        assert!(matches!(report.outcome("gitops"), Some(Outcome::Skipped(_))));
        assert_eq!(runner.count("helm upgrade --install argocd"), 0);
        assert_eq!(report.state, RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        // Nodes never become ready, so the cluster stage is still polling.
        runner.on_stdout("kubectl get nodes", r#"{"items": []}"#);
        let env = environment(test_config(dir.path()), &runner);
        let token = Arc::new(CancellationToken::new());

        let plan = env
            .provisioning_plan(token.clone(), Arc::new(NoOpEventSink))
            .unwrap();
        let handle = tokio::spawn(plan.run());
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel("interrupt");
        let report = handle.await.unwrap();

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.outcome("cluster"), Some(&Outcome::Interrupted));
        assert_eq!(report.outcome("ingress"), Some(&Outcome::NotRun));
    }

    #[tokio::test]
    async fn test_teardown_cluster_only_uninstalls_in_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout("kind get clusters", "kindstack\n").on_stdout(
            "helm list",
            r#"[
                {"name": "ingress-nginx", "namespace": "ingress-nginx"},
                {"name": "openldap", "namespace": "ldap"},
                {"name": "dex", "namespace": "dex"},
                {"name": "kube-prometheus-stack", "namespace": "monitoring"},
                {"name": "argocd", "namespace": "argocd"},
                {"name": "forgejo", "namespace": "forgejo"}
            ]"#,
        );
        let env = environment(test_config(dir.path()), &runner);

        let report = env
            .teardown_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink))
            .run(TeardownScope::ClusterOnly)
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        let removals: Vec<String> = runner
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("helm uninstall") || c.starts_with("kind delete"))
            .map(|c| c.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
            .collect();
        assert_eq!(
            removals,
            [
                "helm uninstall forgejo",
                "helm uninstall argocd",
                "helm uninstall kube-prometheus-stack",
                "helm uninstall dex",
                "helm uninstall openldap",
                "helm uninstall ingress-nginx",
                "kind delete cluster",
            ]
        );
        assert_eq!(runner.count("docker"), 0);
    }

    #[tokio::test]
    async fn test_teardown_of_absent_environment_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let env = environment(test_config(dir.path()), &runner);
        let plan = env.teardown_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink));

        let first = plan.run(TeardownScope::All).await.unwrap();
        let second = plan.run(TeardownScope::All).await.unwrap();

        assert_eq!(first.state, RunState::Completed);
        assert_eq!(second.state, RunState::Completed);
        assert!(first.outcomes().iter().all(|(_, o)| o.is_success()));
        assert_eq!(runner.count("helm"), 0);
        assert_eq!(runner.count("kind delete"), 0);
        assert_eq!(runner.count("docker rm"), 0);
        assert_eq!(runner.count("docker network rm"), 0);
    }

    #[tokio::test]
    async fn test_teardown_resources_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner
            .on_stdout("docker ps -a -q --filter label=io.x-k8s.kind.cluster=kindstack", "c1\n")
            .on_stdout("docker network ls", "bridge\nkind\n")
            .on_stdout("docker network inspect kind", "0\n");
        let env = environment(test_config(dir.path()), &runner);

        let report = env
            .teardown_plan(Arc::new(CancellationToken::new()), Arc::new(NoOpEventSink))
            .run(TeardownScope::ResourcesOnly)
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(
            report.outcomes().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            ["docker-containers", "docker-volumes", "docker-network"]
        );
        assert_eq!(runner.count("docker rm -f c1"), 1);
        assert_eq!(runner.count("docker volume rm"), 0);
        assert_eq!(runner.count("docker network rm kind"), 1);
        assert_eq!(runner.count("kind"), 0);
    }

    #[tokio::test]
    async fn test_shared_network_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner
            .on_stdout("docker network ls", "kind\n")
            .on_stdout("docker network inspect kind", "2\n");
        let env = environment(test_config(dir.path()), &runner);

        let items = env.inventory(TeardownScope::ResourcesOnly).await;

        let network = items.iter().find(|i| i.name == "docker-network").unwrap();
        assert!(!network.present);
    }

    #[tokio::test]
    async fn test_inventory_config_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kubeconfig"), "apiVersion: v1\n").unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner
            .on_stdout("kubectl config get-contexts", "kind-kindstack\n")
            .on(
                "kubectl config get-clusters",
                CommandOutput::ok("NAME\nkind-kindstack\n"),
            );
        let env = environment(test_config(dir.path()), &runner);

        let items = env.inventory(TeardownScope::ConfigOnly).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "kubeconfig-entries");
        assert!(items[0].present);
        assert_eq!(runner.count("kubectl config delete"), 0);
    }

    #[tokio::test]
    async fn test_status_reports_services() {
        let dir = tempfile::tempdir().unwrap();
        let runner = healthy_runner();
        runner.on_stdout("kind get clusters", "kindstack\n").on_stdout(
            "helm list",
            r#"[{"name": "dex", "namespace": "dex", "status": "deployed", "chart": "dex-0.15.2"}]"#,
        );
        let mut config = test_config(dir.path());
        config.services.retain(|s| s.stage == "oidc" || s.stage == "gitops");
        config.services[1].enabled = false;
        let env = environment(config, &runner);

        let status = env.status().await;

        assert!(status.cluster_present);
        assert_eq!((status.nodes_ready, status.nodes_total), (1, 1));
        let dex = &status.services[0];
        assert_eq!(dex.release_status.as_deref(), Some("deployed"));
        assert!(dex.deployments[0].is_available());
        assert!(dex.endpoint.is_none());
        assert!(status.is_healthy());
    }

    #[tokio::test]
    async fn test_status_without_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let mut config = test_config(dir.path());
        config.services = vec![ServiceSpec::new("oidc", "dex", "dex", "dex").awaiting("dex")];
        let env = environment(config, &runner);

        let status = env.status().await;

        assert!(!status.cluster_present);
        assert!(!status.is_healthy());
        assert_eq!(status.services[0].deployments[0].status, None);
        assert_eq!(runner.count("kubectl"), 0);
    }
}
