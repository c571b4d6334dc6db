//! Pruning of old deployments beyond the revision history limit

use super::deployment::{active_deployment, sort_by_version, DeploymentExt};
use crate::controller::errors::{AggregateError, StoreError};
use crate::controller::store::ObjectStore;
use crate::crd::deployment_config::DeploymentConfig;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::ResourceExt;
use tracing::{debug, info};

/// Deployments that may be pruned, oldest first
///
/// Only terminal deployments qualify. With an active deployment, only the
/// versions older than it are considered; without one, every version except
/// the latest.
pub fn prunable_deployments(
    config: &DeploymentConfig,
    deployments: &[ReplicationController],
) -> Vec<ReplicationController> {
    let active_version = active_deployment(deployments).and_then(|d| d.version());
    let latest_version = config.latest_version();

    let mut prunable: Vec<ReplicationController> = deployments
        .iter()
        .filter(|d| d.is_terminal())
        .filter(|d| match (d.version(), active_version) {
            (Some(version), Some(active)) => version < active,
            (version, None) => version != Some(latest_version),
            (None, Some(_)) => false,
        })
        .cloned()
        .collect();
    sort_by_version(&mut prunable);
    prunable
}

/// Delete the oldest prunable deployments above `revisionHistoryLimit`
///
/// Deployments still scaled up are skipped but count toward the limit.
/// Already deleted deployments are ignored; other failures are collected.
pub async fn cleanup_old_deployments(
    store: &dyn ObjectStore,
    config: &DeploymentConfig,
    deployments: &[ReplicationController],
) -> Result<(), AggregateError<StoreError>> {
    let limit = match config.spec.revision_history_limit {
        Some(limit) => limit.max(0) as usize,
        None => return Ok(()),
    };

    let prunable = prunable_deployments(config, deployments);
    let deletion_count = prunable.len().saturating_sub(limit);
    if deletion_count == 0 {
        return Ok(());
    }

    let mut errors = Vec::new();
    for deployment in prunable.iter().take(deletion_count) {
        let name = deployment.name_any();
        if deployment.spec_replicas() != 0 {
            debug!(deployment = ?name, "Skipping pruning of scaled up deployment");
            continue;
        }
        let namespace = deployment.namespace().unwrap_or_default();
        match store.delete_deployment(&namespace, &name).await {
            Ok(()) => info!(config = ?config.name_any(), deployment = ?name, "Pruned old deployment"),
            Err(e) if e.is_not_found() => {}
            Err(e) => errors.push(e),
        }
    }

    match AggregateError::from_errors(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "history_test.rs"]
mod tests;
