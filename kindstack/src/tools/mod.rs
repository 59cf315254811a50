//! Adapters for the external control plane.
//!
//! Every program runs through a [`CommandRunner`], so the adapters can be
//! exercised against [`crate::testing::FakeRunner`] without a cluster.

mod command;
mod docker;
mod helm;
mod kind;
mod kubectl;
mod prerequisites;

pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use docker::Docker;
pub use helm::{resolve_chart, ChartRef, Helm, Release};
pub use kind::{KindCluster, CLUSTER_LABEL, KIND_NETWORK};
pub use kubectl::{DeploymentStatus, EntryPresence, KubeconfigEntries, Kubectl};
pub use prerequisites::{check_prerequisites, PrerequisiteReport, ToolCheck, REQUIRED_TOOLS};
