//! Readiness made of several declarative conditions and one active probe.
//!
//! Declarative signals (a deployment exists, a pod reports `Running`) can all
//! be true while the component is still unable to serve. The admission
//! webhook of an ingress controller is the motivating case: its endpoints
//! may be published before its TLS listener accepts connections. The
//! compound check therefore finishes with an active probe that exercises the
//! real path, followed by a short settle delay.

use super::poller::{Diagnostic, Poller, Readiness, ReadinessCheck};
use crate::cancellation::CancellationToken;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A named boolean check against the external system.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Returns the condition name, used in logs.
    fn name(&self) -> &str;

    /// Evaluates the condition once.
    async fn holds(&self) -> bool;
}

/// A closure-backed [`Condition`].
pub struct FnCondition<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnCondition<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    /// Creates a condition from a closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Condition for FnCondition<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn holds(&self) -> bool {
        (self.func)().await
    }
}

/// Conjunction of conditions, then an active probe, then a settle delay.
pub struct CompoundReadiness {
    name: String,
    conditions: Vec<Arc<dyn Condition>>,
    condition_check: ReadinessCheck,
    probe: Option<(Arc<dyn Condition>, ReadinessCheck)>,
    settle: Duration,
}

impl CompoundReadiness {
    /// Creates a compound check. Each condition is polled with
    /// `condition_check`.
    #[must_use]
    pub fn new(name: impl Into<String>, condition_check: ReadinessCheck) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            condition_check,
            probe: None,
            settle: Duration::ZERO,
        }
    }

    /// Adds a declarative condition.
    #[must_use]
    pub fn condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the active probe, polled with its own check after every
    /// condition holds.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn Condition>, check: ReadinessCheck) -> Self {
        self.probe = Some((probe, check));
        self
    }

    /// Sets the delay applied after the probe succeeds.
    #[must_use]
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Returns the check name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for every part in order.
    ///
    /// The first part that times out ends the wait; `diagnostic` then runs
    /// once with that part's name. Evaluations are summed across parts.
    pub async fn wait(
        &self,
        token: &CancellationToken,
        diagnostic: Option<Diagnostic<'_>>,
    ) -> Readiness {
        let mut evaluations = 0u32;

        let probe = self.probe.as_ref().map(|(p, check)| (p, check));
        let parts = self
            .conditions
            .iter()
            .map(|c| (c, &self.condition_check))
            .chain(probe);

        for (part, check) in parts {
            let label = format!("{}: {}", self.name, part.name());
            let result = Poller::from_check(&label, check, token)
                .wait(|| part.holds())
                .await;
            evaluations += result.evaluations();

            match result {
                Readiness::Ready { .. } => {
                    debug!(check = %self.name, part = %part.name(), "Part ready");
                }
                Readiness::Cancelled => return Readiness::Cancelled,
                Readiness::TimedOut { .. } => {
                    warn!(
                        check = %self.name,
                        part = %part.name(),
                        evaluations,
                        "Compound readiness failed"
                    );
                    if let Some(diagnostic) = diagnostic {
                        diagnostic(label).await;
                    }
                    return Readiness::TimedOut { evaluations };
                }
            }
        }

        if !self.settle.is_zero() {
            debug!(
                check = %self.name,
                settle_ms = u64::try_from(self.settle.as_millis()).unwrap_or(u64::MAX),
                "Settling"
            );
            if !token.sleep(self.settle).await {
                return Readiness::Cancelled;
            }
        }

        info!(check = %self.name, evaluations, "Compound readiness satisfied");
        Readiness::Ready { evaluations }
    }
}

impl fmt::Debug for CompoundReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundReadiness")
            .field("name", &self.name)
            .field(
                "conditions",
                &self.conditions.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("probe", &self.probe.as_ref().map(|(p, _)| p.name()))
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}
