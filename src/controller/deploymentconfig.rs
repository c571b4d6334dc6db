//! DeploymentConfig controller
//!
//! One reconcile pass lists the deployments of a config, claims them, and then
//! either cancels older rollouts, mints a new version, creates the deployment
//! for the latest version, or reconciles replicas once the rollout settled.

pub mod deployment;
pub mod history;
pub mod reconcile;
pub mod scale;
pub mod status;
pub mod triggers;

pub use deployment::{DeploymentExt, DeploymentPhase};
pub use reconcile::{
    config_key, error_policy, handle, reconcile, Context, ReconcileError, ReconcileOutcome,
};
pub use status::{calculate_status, parse_int_or_percent};
pub use triggers::{trigger_activated, TriggerDecision};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "deploymentconfig_test.rs"]
mod tests;
