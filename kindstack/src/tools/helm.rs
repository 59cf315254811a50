//! Chart installation through `helm`.

use super::{CommandRunner, Invocation};
use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where a chart is installed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum ChartRef {
    /// A packaged `.tgz` or an unpacked chart directory on disk.
    Local {
        /// Path to the package or directory.
        path: PathBuf,
    },
    /// `<repo_name>/<chart>` from a classic chart repository.
    Remote {
        /// Local alias of the repository.
        repo_name: String,
        /// Repository URL.
        repo_url: String,
        /// Chart name inside the repository.
        chart: String,
    },
    /// A chart in an OCI registry.
    Oci {
        /// Full `oci://` reference.
        reference: String,
    },
}

impl ChartRef {
    /// Returns the chart argument passed to `helm upgrade --install`.
    #[must_use]
    pub fn as_arg(&self) -> String {
        match self {
            Self::Local { path } => path.display().to_string(),
            Self::Remote {
                repo_name, chart, ..
            } => format!("{repo_name}/{chart}"),
            Self::Oci { reference } => reference.clone(),
        }
    }

    /// Returns true for charts found on disk.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "local chart {}", path.display()),
            Self::Remote { .. } | Self::Oci { .. } => write!(f, "remote chart {}", self.as_arg()),
        }
    }
}

/// Resolves a chart, preferring a local copy under `charts_dir`.
///
/// Local candidates are `<charts_dir>/<chart>-<version>.tgz` (the highest
/// name wins when several exist) and `<charts_dir>/<chart>/Chart.yaml`.
/// Without a local copy, `repo_url` selects a remote chart; an `oci://` URL
/// yields an OCI reference. Returns `None` if neither is available.
#[must_use]
pub fn resolve_chart(
    charts_dir: Option<&Path>,
    chart: &str,
    repo_name: Option<&str>,
    repo_url: Option<&str>,
) -> Option<ChartRef> {
    if let Some(dir) = charts_dir {
        if let Some(path) = local_package(dir, chart) {
            return Some(ChartRef::Local { path });
        }
        let unpacked = dir.join(chart);
        if unpacked.join("Chart.yaml").is_file() {
            return Some(ChartRef::Local { path: unpacked });
        }
    }

    let url = repo_url?.trim_end_matches('/');
    if url.starts_with("oci://") {
        return Some(ChartRef::Oci {
            reference: format!("{url}/{chart}"),
        });
    }
    Some(ChartRef::Remote {
        repo_name: repo_name.unwrap_or(chart).to_string(),
        repo_url: url.to_string(),
        chart: chart.to_string(),
    })
}

fn local_package(dir: &Path, chart: &str) -> Option<PathBuf> {
    let prefix = format!("{chart}-");
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(".tgz"))
                // A version follows the prefix; rules out `<chart>-operator-1.0.tgz`.
                .is_some_and(|version| version.starts_with(|c: char| c.is_ascii_digit()))
        })
        .max()
}

/// One entry of `helm list -o json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release name.
    pub name: String,
    /// Release namespace.
    pub namespace: String,
    /// Release status (e.g. `deployed`, `failed`).
    #[serde(default)]
    pub status: String,
    /// Chart name and version.
    #[serde(default)]
    pub chart: String,
}

#[derive(Debug, Deserialize)]
struct RepoEntry {
    name: String,
    url: String,
}

/// `helm` bound to one kube context.
#[derive(Debug, Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    kube_context: Option<String>,
}

impl Helm {
    /// Creates a client using the current kube context.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kube_context: None,
        }
    }

    /// Pins every cluster-facing call to `context`.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    fn command<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inv = Invocation::new("helm").args(args);
        match &self.kube_context {
            Some(context) => inv.arg("--kube-context").arg(context.clone()),
            None => inv,
        }
    }

    /// Adds a chart repository unless it is already configured with the
    /// same URL, then refreshes its index.
    pub async fn ensure_repo(&self, name: &str, url: &str) -> Result<(), ToolError> {
        let list = Invocation::new("helm").args(["repo", "list", "-o", "json"]);
        let output = self.runner.run(&list).await?;
        let repos: Vec<RepoEntry> = if output.success() && output.stdout.trim().is_empty() {
            Vec::new()
        } else if output.success() {
            serde_json::from_str(&output.stdout)
                .map_err(|e| ToolError::parse(list.display(), e.to_string()))?
        } else if output.stderr.contains("no repositories") {
            Vec::new()
        } else {
            return Err(ToolError::non_zero(list.display(), output.code, output.stderr));
        };

        if repos
            .iter()
            .any(|r| r.name == name && r.url.trim_end_matches('/') == url.trim_end_matches('/'))
        {
            debug!(repo = name, "Chart repository already configured");
        } else {
            info!(repo = name, url, "Adding chart repository");
            self.runner
                .run_ok(&Invocation::new("helm").args(["repo", "add", name, url, "--force-update"]))
                .await?;
        }

        self.runner
            .run_ok(&Invocation::new("helm").args(["repo", "update", name]))
            .await?;
        Ok(())
    }

    /// Installs or upgrades a release and waits for its resources.
    pub async fn install_or_upgrade(
        &self,
        release: &str,
        chart: &ChartRef,
        values_file: Option<&Path>,
        namespace: &str,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.to_string(),
            chart.as_arg(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--create-namespace".to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", timeout.as_secs()),
        ];
        if let Some(values) = values_file {
            args.push("-f".to_string());
            args.push(values.display().to_string());
        }
        self.runner.run_ok(&self.command(args)).await?;
        Ok(())
    }

    /// Lists releases in `namespace`, or in every namespace when `None`.
    pub async fn releases(&self, namespace: Option<&str>) -> Result<Vec<Release>, ToolError> {
        let mut args = vec!["list", "-o", "json"];
        match namespace {
            Some(ns) => args.extend(["-n", ns]),
            None => args.push("-A"),
        }
        let inv = self.command(args);
        let stdout = self.runner.run_ok(&inv).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&stdout).map_err(|e| ToolError::parse(inv.display(), e.to_string()))
    }

    /// Returns true if `release` exists in `namespace`.
    pub async fn release_exists(&self, release: &str, namespace: &str) -> Result<bool, ToolError> {
        Ok(self
            .releases(Some(namespace))
            .await?
            .iter()
            .any(|r| r.name == release))
    }

    /// Uninstalls a release.
    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), ToolError> {
        self.runner
            .run_ok(&self.command(["uninstall", release, "-n", namespace, "--wait"]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use crate::tools::CommandOutput;

    #[test]
    fn test_local_package_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dex-0.14.0.tgz"), b"").unwrap();
        std::fs::write(dir.path().join("dex-0.15.2.tgz"), b"").unwrap();
        std::fs::write(dir.path().join("dex-operator-1.0.0.tgz"), b"").unwrap();

        let chart = resolve_chart(
            Some(dir.path()),
            "dex",
            Some("dex"),
            Some("https://charts.dexidp.io"),
        );

        assert_eq!(
            chart,
            Some(ChartRef::Local {
                path: dir.path().join("dex-0.15.2.tgz")
            })
        );
    }

    #[test]
    fn test_unpacked_chart_directory() {
        let dir = tempfile::tempdir().unwrap();
        let chart_dir = dir.path().join("argo-cd");
        std::fs::create_dir(&chart_dir).unwrap();
        std::fs::write(chart_dir.join("Chart.yaml"), "name: argo-cd\n").unwrap();

        let chart = resolve_chart(Some(dir.path()), "argo-cd", None, None).unwrap();
        assert!(chart.is_local());
        assert_eq!(chart.as_arg(), chart_dir.display().to_string());
    }

    #[test]
    fn test_remote_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let chart = resolve_chart(
            Some(dir.path()),
            "ingress-nginx",
            Some("ingress-nginx"),
            Some("https://kubernetes.github.io/ingress-nginx/"),
        )
        .unwrap();
        assert_eq!(chart.as_arg(), "ingress-nginx/ingress-nginx");

        let registry = Some("oci://code.forgejo.org/forgejo-helm");
        let oci = resolve_chart(None, "forgejo", None, registry).unwrap();
        assert_eq!(oci.as_arg(), "oci://code.forgejo.org/forgejo-helm/forgejo");

        assert_eq!(resolve_chart(Some(dir.path()), "dex", None, None), None);
    }

    #[tokio::test]
    async fn test_ensure_repo_is_idempotent() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout(
            "helm repo list",
            r#"[{"name": "dex", "url": "https://charts.dexidp.io"}]"#,
        );
        let helm = Helm::new(runner.clone());

        helm.ensure_repo("dex", "https://charts.dexidp.io").await.unwrap();

        assert_eq!(runner.count("helm repo add"), 0);
        assert_eq!(runner.count("helm repo update dex"), 1);
    }

    #[tokio::test]
    async fn test_ensure_repo_with_no_repositories() {
        let runner = Arc::new(FakeRunner::new());
        runner.on(
            "helm repo list",
            CommandOutput::failed(1, "Error: no repositories to show"),
        );
        let helm = Helm::new(runner.clone());

        helm.ensure_repo("dex", "https://charts.dexidp.io").await.unwrap();

        assert_eq!(
            runner.count("helm repo add dex https://charts.dexidp.io --force-update"),
            1
        );
    }

    #[tokio::test]
    async fn test_install_command_line() {
        let runner = Arc::new(FakeRunner::new());
        let helm = Helm::new(runner.clone()).with_context("kind-kindstack");
        let chart = ChartRef::Remote {
            repo_name: "dex".to_string(),
            repo_url: "https://charts.dexidp.io".to_string(),
            chart: "dex".to_string(),
        };

        helm.install_or_upgrade(
            "dex",
            &chart,
            Some(Path::new("/values/dex.yaml")),
            "dex",
            Duration::from_secs(600),
        )
        .await
        .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "helm upgrade --install dex dex/dex --namespace dex --create-namespace --wait \
                 --timeout 600s -f /values/dex.yaml --kube-context kind-kindstack"
            ]
        );
    }

    #[tokio::test]
    async fn test_release_listing() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout(
            "helm list -o json -n dex",
            r#"[{"name": "dex", "namespace": "dex", "status": "deployed", "chart": "dex-0.15.2"}]"#,
        );
        let helm = Helm::new(runner);

        assert!(helm.release_exists("dex", "dex").await.unwrap());
        assert!(!helm.release_exists("argocd", "dex").await.unwrap());
    }
}
