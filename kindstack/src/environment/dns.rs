//! CoreDNS patching so ingress hostnames resolve inside the cluster.
//!
//! Hostnames under the environment domain are answered by a `hosts` block
//! placed between marker comments in the first server block of the
//! Corefile. Re-patching replaces the marked region, so the patch is
//! idempotent.

use super::timeout_outcome;
use crate::config::EnvConfig;
use crate::core::Outcome;
use crate::errors::ProvisionError;
use crate::readiness::Poller;
use crate::sequencer::{with_retry, RetryFailure};
use crate::stages::{Stage, StageContext};
use crate::tools::Kubectl;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// First line of the managed region.
pub const HOSTS_BEGIN: &str = "# kindstack hosts begin";
/// Last line of the managed region.
pub const HOSTS_END: &str = "# kindstack hosts end";

/// Key of the Corefile inside the CoreDNS ConfigMap.
pub const COREFILE_KEY: &str = "Corefile";

/// Result of patching a Corefile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorefilePatch {
    /// The managed region already has the wanted content.
    Unchanged,
    /// The new Corefile.
    Patched(String),
}

fn hosts_block(ip: &str, hostnames: &[String]) -> Vec<String> {
    let mut lines = vec![format!("    {HOSTS_BEGIN}"), "    hosts {".to_string()];
    lines.extend(hostnames.iter().map(|host| format!("       {ip} {host}")));
    lines.push("       fallthrough".to_string());
    lines.push("    }".to_string());
    lines.push(format!("    {HOSTS_END}"));
    lines
}

/// Places a `hosts` block mapping `hostnames` to `ip` into `corefile`.
///
/// Returns `None` if the Corefile has no root server block (`.:53 {`) or
/// an unterminated managed region.
#[must_use]
pub fn patch_corefile(corefile: &str, ip: &str, hostnames: &[String]) -> Option<CorefilePatch> {
    let lines: Vec<&str> = corefile.lines().collect();
    let block = hosts_block(ip, hostnames);

    let begin = lines.iter().position(|l| l.trim() == HOSTS_BEGIN);
    let mut patched: Vec<String> = Vec::with_capacity(lines.len() + block.len());

    if let Some(begin) = begin {
        let end = begin + lines[begin..].iter().position(|l| l.trim() == HOSTS_END)?;
        let current: Vec<String> = lines[begin..=end].iter().map(ToString::to_string).collect();
        if current == block {
            return Some(CorefilePatch::Unchanged);
        }
        patched.extend(lines[..begin].iter().map(ToString::to_string));
        patched.extend(block);
        patched.extend(lines[end + 1..].iter().map(ToString::to_string));
    } else {
        let open = lines.iter().position(|l| {
            let l = l.trim();
            l.starts_with(".:53") && l.ends_with('{')
        })?;
        patched.extend(lines[..=open].iter().map(ToString::to_string));
        patched.extend(block);
        patched.extend(lines[open + 1..].iter().map(ToString::to_string));
    }

    let mut text = patched.join("\n");
    if corefile.ends_with('\n') {
        text.push('\n');
    }
    Some(CorefilePatch::Patched(text))
}

/// Points ingress hostnames at the ingress controller's cluster IP.
#[derive(Debug)]
pub struct DnsStage {
    config: Arc<EnvConfig>,
    kubectl: Kubectl,
}

impl DnsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: Arc<EnvConfig>, kubectl: Kubectl) -> Self {
        Self { config, kubectl }
    }

    async fn target_ip(&self, ctx: &StageContext) -> Result<String, ProvisionError> {
        let (dns, kubectl) = (&self.config.dns, &self.kubectl);
        with_retry(&self.config.retry, "resolve ingress cluster IP", &ctx.token, || async move {
            kubectl
                .service_cluster_ip(&dns.target_service, &dns.target_namespace)
                .await?
                .ok_or_else(|| {
                    ProvisionError::TransientExternal(format!(
                        "service {}/{} has no cluster IP yet",
                        dns.target_namespace, dns.target_service
                    ))
                })
        })
        .await
        .map_err(RetryFailure::into_error)
    }

    async fn corefile(&self, ctx: &StageContext) -> Result<String, ProvisionError> {
        let (dns, kubectl) = (&self.config.dns, &self.kubectl);
        with_retry(&self.config.retry, "read Corefile", &ctx.token, || async move {
            kubectl
                .configmap_value(&dns.configmap, &dns.namespace, COREFILE_KEY)
                .await?
                .ok_or_else(|| {
                    ProvisionError::TransientExternal(format!(
                        "configmap {}/{} has no {COREFILE_KEY}",
                        dns.namespace, dns.configmap
                    ))
                })
        })
        .await
        .map_err(RetryFailure::into_error)
    }

    async fn apply(&self, ctx: &StageContext, corefile: &str) -> Result<(), ProvisionError> {
        let (dns, kubectl) = (&self.config.dns, &self.kubectl);
        with_retry(&self.config.retry, "patch Corefile", &ctx.token, || async move {
            kubectl
                .patch_configmap(&dns.configmap, &dns.namespace, COREFILE_KEY, corefile)
                .await
                .map_err(ProvisionError::from)
        })
        .await
        .map_err(RetryFailure::into_error)?;

        with_retry(&self.config.retry, "restart CoreDNS", &ctx.token, || async move {
            kubectl
                .rollout_restart(&dns.deployment, &dns.namespace)
                .await
                .map_err(ProvisionError::from)
        })
        .await
        .map_err(RetryFailure::into_error)
    }
}

#[async_trait]
impl Stage for DnsStage {
    fn name(&self) -> &str {
        "dns"
    }

    async fn execute(&self, ctx: &StageContext) -> Outcome {
        let hostnames = self.config.hostnames();
        if hostnames.is_empty() {
            return Outcome::Skipped("no ingress hostnames configured".to_string());
        }

        ctx.emit_progress(format!("mapping {} hostname(s) in CoreDNS", hostnames.len()));
        let ip = match self.target_ip(ctx).await {
            Ok(ip) => ip,
            Err(e) => return Outcome::from_result(Err(e)),
        };
        let corefile = match self.corefile(ctx).await {
            Ok(corefile) => corefile,
            Err(e) => return Outcome::from_result(Err(e)),
        };

        let patched = match patch_corefile(&corefile, &ip, &hostnames) {
            None => {
                warn!(stage = "dns", "Corefile has no root server block; not patching");
                return Outcome::failure("unrecognized Corefile layout");
            }
            Some(CorefilePatch::Unchanged) => {
                info!(stage = "dns", ip = %ip, "CoreDNS already maps ingress hostnames");
                return Outcome::Success;
            }
            Some(CorefilePatch::Patched(patched)) => patched,
        };

        if let Err(e) = self.apply(ctx, &patched).await {
            return Outcome::from_result(Err(e));
        }
        info!(stage = "dns", ip = %ip, hosts = hostnames.len(), "Patched CoreDNS");

        let (dns, kubectl) = (&self.config.dns, &self.kubectl);
        let check = &dns.readiness;
        let result = Poller::from_check("deployment coredns", check, &ctx.token)
            .wait(|| async move {
                matches!(
                    kubectl.deployment_status(&dns.deployment, &dns.namespace).await,
                    Ok(Some(status)) if status.is_available()
                )
            })
            .await;
        timeout_outcome(result, check.on_timeout, "CoreDNS", check.timeout())
    }
}
