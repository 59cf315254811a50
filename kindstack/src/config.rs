//! Environment configuration.
//!
//! [`EnvConfig`] is loaded once, validated, and then shared read-only through
//! an `Arc`. Every field has a default, so an absent or partial TOML file
//! describes the stock environment.

use crate::errors::ConfigError;
use crate::readiness::{ReadinessCheck, TimeoutPolicy};
use crate::sequencer::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding the kubeconfig path.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Stage names used by the fixed part of the plan.
pub const RESERVED_STAGES: [&str; 3] = ["prerequisites", "cluster", "dns"];

/// Stage name of the ingress controller service.
pub const INGRESS_STAGE: &str = "ingress";

#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("constant regex pattern is valid")
});

/// Returns true if `value` is a valid RFC 1123 label.
#[must_use]
pub fn is_dns_label(value: &str) -> bool {
    value.len() <= 63 && DNS_LABEL.is_match(value)
}

/// Returns the default kubeconfig path, `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}

/// Readiness parameters for the ingress admission webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Controller deployment name.
    pub controller_deployment: String,
    /// Admission webhook service name.
    pub admission_service: String,
    /// Label selector of the controller pods.
    pub pod_selector: String,
    /// Check used for each declarative condition.
    pub condition: ReadinessCheck,
    /// Check used for the dry-run probe.
    pub probe: ReadinessCheck,
    /// Delay after the probe first succeeds, in seconds.
    pub settle_secs: u64,
    /// What a webhook timeout does to the ingress stage.
    pub on_timeout: TimeoutPolicy,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            controller_deployment: "ingress-nginx-controller".to_string(),
            admission_service: "ingress-nginx-controller-admission".to_string(),
            pod_selector: "app.kubernetes.io/component=controller,app.kubernetes.io/instance=ingress-nginx"
                .to_string(),
            condition: ReadinessCheck::new(
                Duration::from_secs(2),
                Duration::from_secs(120),
                TimeoutPolicy::Warn,
            ),
            probe: ReadinessCheck::new(
                Duration::from_secs(3),
                Duration::from_secs(90),
                TimeoutPolicy::Warn,
            ),
            settle_secs: 5,
            on_timeout: TimeoutPolicy::Warn,
        }
    }
}

impl WebhookSettings {
    /// Returns the settle delay.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// CoreDNS patch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Namespace of CoreDNS.
    pub namespace: String,
    /// CoreDNS ConfigMap name.
    pub configmap: String,
    /// CoreDNS deployment name.
    pub deployment: String,
    /// Service whose cluster IP the ingress hostnames resolve to.
    pub target_service: String,
    /// Namespace of `target_service`.
    pub target_namespace: String,
    /// Readiness check for the restarted CoreDNS.
    pub readiness: ReadinessCheck,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            configmap: "coredns".to_string(),
            deployment: "coredns".to_string(),
            target_service: "ingress-nginx-controller".to_string(),
            target_namespace: "ingress-nginx".to_string(),
            readiness: ReadinessCheck::new(
                Duration::from_secs(2),
                Duration::from_secs(120),
                TimeoutPolicy::Warn,
            ),
        }
    }
}

/// One Helm-installed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Stage name in the plan.
    pub stage: String,
    /// Helm release name.
    pub release: String,
    /// Target namespace.
    pub namespace: String,
    /// Chart name.
    pub chart: String,
    /// Local alias of the chart repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    /// Chart repository URL; `oci://` for registries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// Values file, relative to the values directory. Must exist when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<PathBuf>,
    /// Deployments that must become available after install.
    #[serde(default)]
    pub deployments: Vec<String>,
    /// Ingress host label, joined with the environment domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Whether a failure aborts the run.
    #[serde(default)]
    pub fatal: bool,
    /// Disabled services are reported as skipped.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Readiness check overriding the environment default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessCheck>,
    /// Earlier stages this service relies on, besides the cluster.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

fn enabled() -> bool {
    true
}

impl ServiceSpec {
    /// Creates an enabled, non-fatal service installed from a chart repository.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        release: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            release: release.into(),
            namespace: namespace.into(),
            chart: chart.into(),
            repo_name: None,
            repo_url: None,
            values_file: None,
            deployments: Vec::new(),
            host: None,
            fatal: false,
            enabled: true,
            readiness: None,
            after: Vec::new(),
        }
    }

    /// Sets the chart repository.
    #[must_use]
    pub fn with_repo(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.repo_name = Some(name.into());
        self.repo_url = Some(url.into());
        self
    }

    /// Sets the OCI registry holding the chart.
    #[must_use]
    pub fn with_oci(mut self, registry: impl Into<String>) -> Self {
        self.repo_name = None;
        self.repo_url = Some(registry.into());
        self
    }

    /// Adds a deployment to await.
    #[must_use]
    pub fn awaiting(mut self, deployment: impl Into<String>) -> Self {
        self.deployments.push(deployment.into());
        self
    }

    /// Sets the ingress host label.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Declares a dependency on an earlier stage.
    #[must_use]
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.after.push(stage.into());
        self
    }

    /// Makes the service fatal.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// The dev environment's default services, in install order.
#[must_use]
pub fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new(INGRESS_STAGE, "ingress-nginx", "ingress-nginx", "ingress-nginx")
            .with_repo("ingress-nginx", "https://kubernetes.github.io/ingress-nginx")
            .awaiting("ingress-nginx-controller")
            .fatal(),
        ServiceSpec::new("ldap", "openldap", "ldap", "openldap-stack-ha")
            .with_repo("helm-openldap", "https://jp-gouin.github.io/helm-openldap"),
        ServiceSpec::new("oidc", "dex", "dex", "dex")
            .with_repo("dex", "https://charts.dexidp.io")
            .awaiting("dex")
            .with_host("dex")
            .after("ldap"),
        ServiceSpec::new(
            "monitoring",
            "kube-prometheus-stack",
            "monitoring",
            "kube-prometheus-stack",
        )
        .with_repo(
            "prometheus-community",
            "https://prometheus-community.github.io/helm-charts",
        )
        .awaiting("kube-prometheus-stack-operator")
        .awaiting("kube-prometheus-stack-grafana")
        .with_host("grafana"),
        ServiceSpec::new("gitops", "argocd", "argocd", "argo-cd")
            .with_repo("argo", "https://argoproj.github.io/argo-helm")
            .awaiting("argocd-server")
            .awaiting("argocd-repo-server")
            .with_host("argocd"),
        ServiceSpec::new("forge", "forgejo", "forgejo", "forgejo")
            .with_oci("oci://code.forgejo.org/forgejo-helm")
            .awaiting("forgejo")
            .with_host("git"),
    ]
}

/// Immutable description of the environment to provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Kind cluster name.
    pub cluster_name: String,
    /// Kind cluster config file.
    pub kind_config: PathBuf,
    /// Directory searched for local chart copies.
    pub charts_dir: Option<PathBuf>,
    /// Directory holding values files.
    pub values_dir: PathBuf,
    /// Kubeconfig holding the cluster's entries. Defaults to `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// Domain ingress hosts are published under.
    pub domain: String,
    /// Time allowed for the control plane after `kind create cluster`.
    pub cluster_wait_secs: u64,
    /// Timeout of each `helm upgrade --install`.
    pub helm_timeout_secs: u64,
    /// Retry policy for external calls.
    pub retry: RetryPolicy,
    /// Default readiness check for service deployments.
    pub readiness: ReadinessCheck,
    /// Ingress admission webhook readiness.
    pub webhook: WebhookSettings,
    /// CoreDNS patching.
    pub dns: DnsSettings,
    /// Whether the status probe requests ingress hosts over HTTP.
    pub http_probe: bool,
    /// Services, in install order.
    pub services: Vec<ServiceSpec>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            cluster_name: "kindstack".to_string(),
            kind_config: PathBuf::from("kind-config.yaml"),
            charts_dir: Some(PathBuf::from("charts")),
            values_dir: PathBuf::from("values"),
            kubeconfig: None,
            domain: "localtest.me".to_string(),
            cluster_wait_secs: 120,
            helm_timeout_secs: 600,
            retry: RetryPolicy::default(),
            readiness: ReadinessCheck::default(),
            webhook: WebhookSettings::default(),
            dns: DnsSettings::default(),
            http_probe: true,
            services: default_services(),
        }
    }
}

impl EnvConfig {
    /// Loads the configuration.
    ///
    /// Without a path the defaults are used. The `KUBECONFIG` environment
    /// variable is applied, then the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                debug!(path = %path.display(), "Loaded configuration file");
                Self::from_toml_str(&content, path, base)?
            }
            None => Self::default(),
        };
        let config = config.with_env(|key| std::env::var_os(key));
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML, resolving relative paths against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] naming `source` if the document does
    /// not match the schema.
    pub fn from_toml_str(content: &str, source: &Path, base: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.kind_config);
        resolve(&mut self.values_dir);
        if let Some(dir) = self.charts_dir.as_mut() {
            resolve(dir);
        }
        if let Some(kubeconfig) = self.kubeconfig.as_mut() {
            resolve(kubeconfig);
        }
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// `KUBECONFIG` may list several files; the first one holds the entries
    /// kind writes.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(value) = lookup(KUBECONFIG_ENV) {
            if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
                debug!(kubeconfig = %first.display(), "Using KUBECONFIG override");
                self.kubeconfig = Some(first);
            }
        }
        self
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_dns_label(&self.cluster_name) {
            return Err(ConfigError::Invalid(format!(
                "cluster_name '{}' must be a lowercase RFC 1123 label",
                self.cluster_name
            )));
        }
        if self.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("domain must not be empty".to_string()));
        }
        self.retry.validate()?;

        check_readiness("readiness", &self.readiness)?;
        check_readiness("webhook.condition", &self.webhook.condition)?;
        check_readiness("webhook.probe", &self.webhook.probe)?;
        check_readiness("dns.readiness", &self.dns.readiness)?;

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.stage.is_empty() || RESERVED_STAGES.contains(&service.stage.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "service stage name '{}' is empty or reserved",
                    service.stage
                )));
            }
            if !seen.insert(service.stage.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "service stage '{}' is declared twice",
                    service.stage
                )));
            }
            if !is_dns_label(&service.namespace) {
                return Err(ConfigError::Invalid(format!(
                    "service '{}': namespace '{}' is not a valid label",
                    service.stage, service.namespace
                )));
            }
            if service.release.is_empty() || service.chart.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service '{}': release and chart must be set",
                    service.stage
                )));
            }
            let undeclared = |dep: &&String| {
                !RESERVED_STAGES.contains(&dep.as_str()) && !seen.contains(dep.as_str())
            };
            if let Some(dep) = service.after.iter().find(undeclared) {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' depends on '{dep}', which is not declared before it",
                    service.stage
                )));
            }
            if let Some(check) = &service.readiness {
                check_readiness(&format!("services.{}.readiness", service.stage), check)?;
            }
        }
        Ok(())
    }

    /// Returns the kubeconfig path in effect.
    #[must_use]
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig.clone().unwrap_or_else(default_kubeconfig)
    }

    /// Returns the kube context kind creates for the cluster.
    #[must_use]
    pub fn context_name(&self) -> String {
        format!("kind-{}", self.cluster_name)
    }

    /// Returns the control-plane wait.
    #[must_use]
    pub fn cluster_wait(&self) -> Duration {
        Duration::from_secs(self.cluster_wait_secs)
    }

    /// Returns the Helm timeout.
    #[must_use]
    pub fn helm_timeout(&self) -> Duration {
        Duration::from_secs(self.helm_timeout_secs)
    }

    /// Looks up a service by stage name.
    #[must_use]
    pub fn service(&self, stage: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.stage == stage)
    }

    /// Returns the fully qualified ingress hostname of a service.
    #[must_use]
    pub fn hostname(&self, service: &ServiceSpec) -> Option<String> {
        service
            .host
            .as_ref()
            .map(|host| format!("{host}.{}", self.domain))
    }

    /// Returns every ingress hostname, in service order.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| self.hostname(s))
            .collect()
    }

    /// Returns the values file path of a service.
    #[must_use]
    pub fn values_path(&self, service: &ServiceSpec) -> Option<PathBuf> {
        service.values_file.as_ref().map(|file| {
            if file.is_relative() {
                self.values_dir.join(file)
            } else {
                file.clone()
            }
        })
    }

    /// Returns the readiness check of a service.
    #[must_use]
    pub fn readiness_for<'a>(&'a self, service: &'a ServiceSpec) -> &'a ReadinessCheck {
        service.readiness.as_ref().unwrap_or(&self.readiness)
    }
}

fn check_readiness(field: &str, check: &ReadinessCheck) -> Result<(), ConfigError> {
    if check.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(format!(
            "{field}.poll_interval_ms must be greater than 0"
        )));
    }
    Ok(())
}
