//! Workload inspection and mutation through `kubectl`.

use super::{CommandRunner, Invocation};
use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Replica counts of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentStatus {
    /// Desired replicas from the spec.
    pub desired: u32,
    /// Replicas passing readiness probes.
    pub ready: u32,
    /// Replicas available for at least `minReadySeconds`.
    pub available: u32,
}

impl DeploymentStatus {
    /// Returns true if every desired replica is available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.desired > 0 && self.available >= self.desired
    }
}

/// `kubectl` bound to one kube context.
#[derive(Debug, Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    context: Option<String>,
}

impl Kubectl {
    /// Creates a client using the current kube context.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            context: None,
        }
    }

    /// Pins every call to `context`.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn command<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inv = Invocation::new("kubectl").args(args);
        match &self.context {
            Some(context) => inv.arg("--context").arg(context.clone()),
            None => inv,
        }
    }

    async fn get_json(&self, args: &[&str]) -> Result<Option<Value>, ToolError> {
        let inv = self.command(args.iter().copied().chain(["-o", "json", "--ignore-not-found"]));
        let stdout = self.runner.run_ok(&inv).await?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&stdout)
            .map(Some)
            .map_err(|e| ToolError::parse(inv.display(), e.to_string()))
    }

    /// Returns true if the named resource exists.
    pub async fn exists(&self, kind: &str, name: &str, namespace: &str) -> Result<bool, ToolError> {
        let stdout = self
            .runner
            .run_ok(&self.command([
                "get",
                kind,
                name,
                "-n",
                namespace,
                "--ignore-not-found",
                "-o",
                "name",
            ]))
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    /// Returns the replica counts of a deployment, `None` if it does not exist.
    pub async fn deployment_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DeploymentStatus>, ToolError> {
        let Some(value) = self.get_json(&["get", "deployment", name, "-n", namespace]).await? else {
            return Ok(None);
        };
        Ok(Some(parse_deployment_status(&value)))
    }

    /// Blocks in `kubectl wait` until resources matching `selector` meet
    /// `condition` or `timeout` passes. Returns false on timeout.
    pub async fn wait_for(
        &self,
        kind: &str,
        selector: &str,
        condition: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<bool, ToolError> {
        let output = self
            .runner
            .run(&self.command([
                "wait".to_string(),
                format!("--for=condition={condition}"),
                kind.to_string(),
                "-l".to_string(),
                selector.to_string(),
                "-n".to_string(),
                namespace.to_string(),
                format!("--timeout={}s", timeout.as_secs()),
            ]))
            .await?;
        Ok(output.success())
    }

    /// Returns the phase of every pod matching `selector`.
    pub async fn pod_phases(
        &self,
        selector: &str,
        namespace: &str,
    ) -> Result<Vec<String>, ToolError> {
        let stdout = self
            .runner
            .run_ok(&self.command([
                "get",
                "pods",
                "-n",
                namespace,
                "-l",
                selector,
                "-o",
                "jsonpath={.items[*].status.phase}",
            ]))
            .await?;
        Ok(stdout.split_whitespace().map(ToString::to_string).collect())
    }

    /// Returns the number of ready endpoint addresses behind a service.
    pub async fn endpoint_addresses(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<usize, ToolError> {
        let args = ["get", "endpoints", service, "-n", namespace];
        let Some(value) = self.get_json(&args).await? else {
            return Ok(0);
        };
        Ok(value["subsets"]
            .as_array()
            .map(|subsets| {
                subsets
                    .iter()
                    .filter_map(|s| s["addresses"].as_array())
                    .map(Vec::len)
                    .sum()
            })
            .unwrap_or(0))
    }

    /// Applies a manifest read from stdin. With `server_dry_run` the API
    /// server validates and admits the object without persisting it.
    pub async fn apply(&self, manifest: &str, server_dry_run: bool) -> Result<(), ToolError> {
        let mut inv = self.command(["apply", "-f", "-"]).stdin(manifest);
        if server_dry_run {
            inv = inv.arg("--dry-run=server");
        }
        self.runner.run_ok(&inv).await?;
        Ok(())
    }

    /// Returns one data key of a ConfigMap.
    pub async fn configmap_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, ToolError> {
        let Some(value) = self.get_json(&["get", "configmap", name, "-n", namespace]).await? else {
            return Ok(None);
        };
        Ok(value["data"][key].as_str().map(ToString::to_string))
    }

    /// Replaces one data key of a ConfigMap with a merge patch.
    pub async fn patch_configmap(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
        data: &str,
    ) -> Result<(), ToolError> {
        let mut entries = serde_json::Map::new();
        entries.insert(key.to_string(), Value::String(data.to_string()));
        let patch = serde_json::json!({ "data": entries }).to_string();
        self.runner
            .run_ok(&self.command([
                "patch",
                "configmap",
                name,
                "-n",
                namespace,
                "--type",
                "merge",
                "-p",
                patch.as_str(),
            ]))
            .await?;
        Ok(())
    }

    /// Restarts the pods of a deployment.
    pub async fn rollout_restart(
        &self,
        deployment: &str,
        namespace: &str,
    ) -> Result<(), ToolError> {
        let target = format!("deployment/{deployment}");
        self.runner
            .run_ok(&self.command(["rollout", "restart", target.as_str(), "-n", namespace]))
            .await?;
        Ok(())
    }

    /// Returns the cluster IP of a service.
    pub async fn service_cluster_ip(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<String>, ToolError> {
        let Some(value) = self.get_json(&["get", "service", name, "-n", namespace]).await? else {
            return Ok(None);
        };
        Ok(value["spec"]["clusterIP"]
            .as_str()
            .filter(|ip| !ip.is_empty() && *ip != "None")
            .map(ToString::to_string))
    }

    /// Returns `(ready, total)` node counts.
    pub async fn nodes_ready(&self) -> Result<(usize, usize), ToolError> {
        let Some(value) = self.get_json(&["get", "nodes"]).await? else {
            return Ok((0, 0));
        };
        let nodes = value["items"].as_array().cloned().unwrap_or_default();
        let ready = nodes
            .iter()
            .filter(|node| {
                node["status"]["conditions"]
                    .as_array()
                    .is_some_and(|conds| {
                        conds
                            .iter()
                            .any(|c| c["type"] == "Ready" && c["status"] == "True")
                    })
            })
            .count();
        Ok((ready, nodes.len()))
    }

    /// Collects pods and recent events of a namespace for diagnostics.
    pub async fn diagnostics(&self, namespace: &str) -> String {
        let mut dump = String::new();
        for args in [
            vec!["get", "pods", "-n", namespace, "-o", "wide"],
            vec!["get", "events", "-n", namespace, "--sort-by=.lastTimestamp"],
        ] {
            let inv = self.command(args);
            dump.push_str(&format!("$ {}\n", inv.display()));
            match self.runner.run(&inv).await {
                Ok(output) => {
                    dump.push_str(&output.stdout);
                    dump.push_str(&output.stderr);
                }
                Err(e) => dump.push_str(&format!("{e}\n")),
            }
        }
        dump
    }
}

fn parse_deployment_status(value: &Value) -> DeploymentStatus {
    let count = |v: &Value| u32::try_from(v.as_u64().unwrap_or(0)).unwrap_or(u32::MAX);
    DeploymentStatus {
        desired: value["spec"]["replicas"]
            .as_u64()
            .map_or(1, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        ready: count(&value["status"]["readyReplicas"]),
        available: count(&value["status"]["availableReplicas"]),
    }
}

/// Kubeconfig entries kind writes for one cluster: a context, a cluster and
/// a user, all named `kind-<cluster>`.
#[derive(Debug, Clone)]
pub struct KubeconfigEntries {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
    name: String,
}

/// Which of the three entries are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryPresence {
    /// A context with the entry name exists.
    pub context: bool,
    /// A cluster with the entry name exists.
    pub cluster: bool,
    /// A user with the entry name exists.
    pub user: bool,
}

impl EntryPresence {
    /// Returns true if any entry is present.
    #[must_use]
    pub fn any(&self) -> bool {
        self.context || self.cluster || self.user
    }
}

impl KubeconfigEntries {
    /// Creates a handle for entries named `name` in `kubeconfig`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        kubeconfig: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.into(),
            name: name.into(),
        }
    }

    /// Returns the kubeconfig path.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Returns the entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn config_command(&self, args: &[&str]) -> Invocation {
        Invocation::new("kubectl")
            .arg("config")
            .args(args.iter().copied())
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string())
    }

    async fn listed(&self, what: &str) -> Result<bool, ToolError> {
        let args: &[&str] = if what == "get-contexts" {
            &["get-contexts", "-o", "name"]
        } else {
            &[what]
        };
        let stdout = self.runner.run_ok(&self.config_command(args)).await?;
        Ok(stdout.lines().map(str::trim).any(|line| line == self.name))
    }

    /// Reports which entries exist. A missing kubeconfig file has none.
    pub async fn presence(&self) -> Result<EntryPresence, ToolError> {
        if !self.kubeconfig.exists() {
            return Ok(EntryPresence::default());
        }
        Ok(EntryPresence {
            context: self.listed("get-contexts").await?,
            cluster: self.listed("get-clusters").await?,
            user: self.listed("get-users").await?,
        })
    }

    /// Deletes whichever entries exist.
    pub async fn delete(&self) -> Result<EntryPresence, ToolError> {
        let presence = self.presence().await?;
        if !presence.any() {
            return Ok(presence);
        }

        let current = self
            .runner
            .run(&self.config_command(&["current-context"]))
            .await?;
        if current.success() && current.stdout.trim() == self.name {
            self.runner
                .run_ok(&self.config_command(&["unset", "current-context"]))
                .await?;
        }
        if presence.context {
            self.runner
                .run_ok(&self.config_command(&["delete-context", self.name.as_str()]))
                .await?;
        }
        if presence.cluster {
            self.runner
                .run_ok(&self.config_command(&["delete-cluster", self.name.as_str()]))
                .await?;
        }
        if presence.user {
            self.runner
                .run_ok(&self.config_command(&["delete-user", self.name.as_str()]))
                .await?;
        }
        Ok(presence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use crate::tools::CommandOutput;

    const DEPLOYMENT: &str = r#"{
        "spec": {"replicas": 2},
        "status": {"readyReplicas": 2, "availableReplicas": 1}
    }"#;

    fn kubectl(runner: &Arc<FakeRunner>) -> Kubectl {
        Kubectl::new(runner.clone()).with_context("kind-kindstack")
    }

    #[tokio::test]
    async fn test_deployment_status() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout("kubectl get deployment dex", DEPLOYMENT);

        let status = kubectl(&runner)
            .deployment_status("dex", "dex")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status, DeploymentStatus { desired: 2, ready: 2, available: 1 });
        assert!(!status.is_available());
        assert!(runner.calls()[0].ends_with("--context kind-kindstack"));
    }

    #[tokio::test]
    async fn test_missing_deployment_is_none() {
        let runner = Arc::new(FakeRunner::new());
        let status = kubectl(&runner).deployment_status("dex", "dex").await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_output_is_parse_error() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout("kubectl get deployment dex", "not json");
        let err = kubectl(&runner).deployment_status("dex", "dex").await.unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_endpoint_addresses_counted() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout(
            "kubectl get endpoints ingress-nginx-controller-admission",
            r#"{"subsets": [{"addresses": [{"ip": "10.0.0.1"}, {"ip": "10.0.0.2"}]}, {"notReadyAddresses": []}]}"#,
        );
        let count = kubectl(&runner)
            .endpoint_addresses("ingress-nginx-controller-admission", "ingress-nginx")
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_wait_for_timeout_is_false() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_fail("kubectl wait", "timed out waiting for the condition");
        let ready = kubectl(&runner)
            .wait_for("pod", "app=dex", "Ready", "dex", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!ready);
        assert!(runner.calls()[0]
            .starts_with("kubectl wait --for=condition=Ready pod -l app=dex -n dex --timeout=30s"));
    }

    #[tokio::test]
    async fn test_server_dry_run_apply_pipes_manifest() {
        let runner = Arc::new(FakeRunner::new());
        kubectl(&runner).apply("kind: Ingress\n", true).await.unwrap();
        assert_eq!(runner.stdin_of("kubectl apply").as_deref(), Some("kind: Ingress\n"));
        assert!(runner.calls()[0].ends_with("--dry-run=server"));
    }

    #[tokio::test]
    async fn test_nodes_ready() {
        let runner = Arc::new(FakeRunner::new());
        runner.on_stdout(
            "kubectl get nodes",
            r#"{"items": [
                {"status": {"conditions": [{"type": "Ready", "status": "True"}]}},
                {"status": {"conditions": [{"type": "Ready", "status": "False"}]}}
            ]}"#,
        );
        assert_eq!(kubectl(&runner).nodes_ready().await.unwrap(), (1, 2));
    }

    #[tokio::test]
    async fn test_kubeconfig_entries_delete_only_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "apiVersion: v1\n").unwrap();

        let runner = Arc::new(FakeRunner::new());
        runner
            .on_stdout("kubectl config get-contexts", "kind-kindstack\nother\n")
            .on_stdout("kubectl config get-clusters", "NAME\nkind-kindstack\n")
            .on_stdout("kubectl config get-users", "NAME\n")
            .on("kubectl config current-context", CommandOutput::ok("other\n"));
        let entries = KubeconfigEntries::new(runner.clone(), &path, "kind-kindstack");

        let removed = entries.delete().await.unwrap();

        assert_eq!(removed, EntryPresence { context: true, cluster: true, user: false });
        assert_eq!(runner.count("kubectl config delete-context kind-kindstack"), 1);
        assert_eq!(runner.count("kubectl config delete-cluster kind-kindstack"), 1);
        assert_eq!(runner.count("kubectl config delete-user"), 0);
        assert_eq!(runner.count("kubectl config unset"), 0);
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_has_no_entries() {
        let runner = Arc::new(FakeRunner::new());
        let entries =
            KubeconfigEntries::new(runner.clone(), "/nonexistent/kubeconfig", "kind-kindstack");
        assert!(!entries.presence().await.unwrap().any());
        assert!(runner.calls().is_empty());
    }
}
