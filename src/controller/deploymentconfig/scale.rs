//! Replica reconciliation for a config whose latest rollout has finished
//!
//! The active deployment runs `spec.replicas` pods and every other deployment
//! is driven to zero. Test configs are driven to zero entirely.

use super::deployment::{active_deployment, DeploymentExt};
use super::history::cleanup_old_deployments;
use super::reconcile::{update_status, Context, ReconcileError};
use crate::controller::events::{reasons, EventKind};
use crate::controller::refmanager::RefManager;
use crate::controller::retry::{retry_on_conflict, DEFAULT_CONFLICT_BACKOFF};
use crate::crd::deployment_config::DeploymentConfig;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::ResourceExt;
use tracing::{info, warn};

/// Replica count a deployment should have
pub fn target_replicas(
    config: &DeploymentConfig,
    deployment: &ReplicationController,
    active_version: Option<i64>,
) -> i32 {
    let is_active = active_version.is_some() && deployment.version() == active_version;
    if config.spec.test || !is_active {
        0
    } else {
        config.spec.replicas
    }
}

/// Scale every deployment to its target, prune history and write status
///
/// A failed scale stops the loop; the deployments scaled so far still count
/// toward the written status and the failure is returned afterwards.
pub async fn reconcile_deployments<F>(
    ctx: &Context,
    config: &DeploymentConfig,
    deployments: Vec<ReplicationController>,
    manager: &RefManager<'_, ReplicationController>,
    matches: &F,
) -> Result<(), ReconcileError>
where
    F: Fn(&ReplicationController) -> bool + Send + Sync,
{
    let namespace = config
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let active_version = active_deployment(&deployments).and_then(|d| d.version());

    let mut reconciled = Vec::with_capacity(deployments.len());
    let mut failure = None;
    let mut remaining = deployments.into_iter();

    for deployment in remaining.by_ref() {
        let target = target_replicas(config, &deployment, active_version);
        let current = deployment.spec_replicas();
        if target == current {
            reconciled.push(deployment);
            continue;
        }

        let name = deployment.name_any();
        match scale_deployment(ctx, &namespace, &name, target, manager, matches).await {
            // Already settled by someone else since the list
            Ok(Some((scaled, previous))) if previous == target => reconciled.push(scaled),
            Ok(Some((scaled, previous))) => {
                info!(
                    config = ?config.name_any(),
                    deployment = ?name,
                    from = previous,
                    to = target,
                    "Scaled deployment"
                );
                ctx.recorder
                    .record(
                        config,
                        EventKind::Normal,
                        reasons::SCALED,
                        format!(
                            "Scaled replication controller {:?} from {} to {}",
                            name, previous, target
                        ),
                    )
                    .await;
                reconciled.push(scaled);
            }
            // Deleted or no longer ours
            Ok(None) => {}
            Err(e) => {
                ctx.recorder
                    .record(
                        config,
                        EventKind::Warning,
                        reasons::SCALE_FAILED,
                        format!(
                            "Failed to scale replication controller {:?} from {} to {}: {}",
                            name, current, target, e
                        ),
                    )
                    .await;
                reconciled.push(deployment);
                failure = Some(e);
                break;
            }
        }
    }
    reconciled.extend(remaining);

    if let Err(e) = cleanup_old_deployments(ctx.store.as_ref(), config, &reconciled).await {
        warn!(config = ?config.name_any(), error = %e, "Failed to prune old deployments");
        ctx.recorder
            .record(
                config,
                EventKind::Warning,
                reasons::DEPLOYMENT_CLEANUP_FAILED,
                format!("Couldn't clean up deployments: {}", e),
            )
            .await;
    }

    update_status(ctx, config, &reconciled, true, &[]).await?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Read-modify-write the replica count of one deployment
///
/// Returns the updated deployment and its previous replica count, or `None`
/// if the deployment is gone or no longer owned by the config. Nothing is
/// written when the fresh copy already runs `target` replicas.
async fn scale_deployment<F>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    target: i32,
    manager: &RefManager<'_, ReplicationController>,
    matches: &F,
) -> Result<Option<(ReplicationController, i32)>, ReconcileError>
where
    F: Fn(&ReplicationController) -> bool + Send + Sync,
{
    let store = ctx.store.as_ref();
    retry_on_conflict(DEFAULT_CONFLICT_BACKOFF, move || async move {
        let mut fresh = match store.get_deployment(namespace, name).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !manager.claim_object(&fresh, matches).await? {
            return Ok(None);
        }
        let previous = fresh.spec_replicas();
        if previous == target {
            return Ok(Some((fresh, previous)));
        }
        fresh.set_spec_replicas(target);
        let updated = store.update_deployment(namespace, &fresh).await?;
        Ok(Some((updated, previous)))
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "scale_test.rs"]
mod tests;
