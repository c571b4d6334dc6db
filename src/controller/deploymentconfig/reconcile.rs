use super::deployment::{
    config_owner_ref, latest_deployment_info, make_deployment, matches_config, DeploymentExt,
    CANCELLED_BY_NEWER_REASON,
};
use super::history::cleanup_old_deployments;
use super::scale::reconcile_deployments;
use super::status::{calculate_status, new_condition, NEW_RC_CREATED_REASON, RC_CREATE_ERROR_REASON};
use super::triggers::{
    has_latest_pod_template, has_unresolved_images, trigger_activated, TriggerDecision,
};
use crate::controller::clock::{Clock, SystemClock};
use crate::controller::errors::{AggregateError, StoreError};
use crate::controller::events::{reasons, EventKind, EventRecorder, KubeEventRecorder};
use crate::controller::refmanager::{
    ClaimError, ConfigAdoptionCheck, DeploymentControl, RefManager,
};
use crate::controller::requeue::{RequeueDecision, RequeuePolicy};
use crate::controller::retry::{retry_on_conflict, ConflictAware, DEFAULT_CONFLICT_BACKOFF};
use crate::controller::store::{KubeStore, ObjectStore};
use crate::crd::deployment_config::{
    ConditionStatus, ConditionType, DeploymentCondition, DeploymentConfig, DeploymentDetails,
};
use crate::server::SharedMetrics;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("DeploymentConfig missing namespace")]
    MissingNamespace,

    #[error("DeploymentConfig missing uid")]
    MissingUid,

    #[error("error while claiming deployments of {config}: {source}")]
    Claim {
        config: String,
        source: AggregateError<ClaimError>,
    },

    #[error(transparent)]
    ClaimObject(#[from] ClaimError),

    #[error("found previous inflight deployment for {0} - requeuing")]
    AwaitingCancellation(String),

    #[error("couldn't create deployment for {config}: {source}")]
    CreateFailed { config: String, source: StoreError },

    /// Retrying cannot help until the config or its deployments change
    #[error("{0}")]
    Fatal(String),
}

impl ReconcileError {
    /// Fatal errors are dropped from the queue instead of retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Fatal(_) | ReconcileError::MissingNamespace | ReconcileError::MissingUid
        )
    }

    /// Metric label for the error class
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileError::AwaitingCancellation(_) => "awaiting_cancellation",
            e if e.is_fatal() => "fatal",
            _ => "transient",
        }
    }
}

impl ConflictAware for ReconcileError {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

/// What one pass of `handle` did
///
/// Passes that end waiting for older rollouts to be cancelled, or that fail,
/// are reported as `ReconcileError::AwaitingCancellation` and
/// `ReconcileError` respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Initial version without triggers, nothing to roll out
    NoOp,
    /// The config is being deleted, only status was refreshed
    Deleting,
    /// status.latestVersion caught up with an existing newer deployment
    VersionSynced(i64),
    /// A trigger minted this version
    TriggerFired(i64),
    /// Waiting for images before a rollout can start
    WaitingOnInput,
    /// The latest version is still being rolled out by the deployer
    RolloutInProgress,
    /// The latest version is settled and replicas were reconciled
    Reconciled,
    /// Paused, history was pruned but nothing was created
    Paused,
    /// The deployment for the latest version exists now
    Created(String),
}

impl ReconcileOutcome {
    /// Metric label for the outcome
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::NoOp => "noop",
            ReconcileOutcome::Deleting => "deleting",
            ReconcileOutcome::VersionSynced(_) => "version_synced",
            ReconcileOutcome::TriggerFired(_) => "trigger_fired",
            ReconcileOutcome::WaitingOnInput => "waiting_on_input",
            ReconcileOutcome::RolloutInProgress => "rollout_in_progress",
            ReconcileOutcome::Reconciled => "reconciled",
            ReconcileOutcome::Paused => "paused",
            ReconcileOutcome::Created(_) => "created",
        }
    }
}

pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub recorder: Arc<dyn EventRecorder>,
    pub clock: Arc<dyn Clock>,
    /// Optional controller metrics for Prometheus
    /// When Some, records reconcile outcomes and durations
    pub metrics: Option<SharedMetrics>,
    pub requeue: RequeuePolicy,
}

impl Context {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        recorder: Arc<dyn EventRecorder>,
        clock: Arc<dyn Clock>,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Context {
            store,
            recorder,
            clock,
            metrics,
            requeue: RequeuePolicy::default(),
        }
    }

    /// Context talking to the cluster behind `client`
    pub fn from_client(
        client: kube::Client,
        metrics: Option<SharedMetrics>,
        max_retries: u32,
    ) -> Self {
        Context {
            store: Arc::new(KubeStore::new(client.clone())),
            recorder: Arc::new(KubeEventRecorder::new(client, "versio-controller")),
            clock: Arc::new(SystemClock),
            metrics,
            requeue: RequeuePolicy::new(max_retries),
        }
    }
}

/// Queue key of a config
pub fn config_key(config: &DeploymentConfig) -> String {
    format!(
        "{}/{}",
        config.namespace().unwrap_or_default(),
        config.name_any()
    )
}

/// Reconcile a DeploymentConfig
///
/// Entry point for the kube controller: runs one pass of `handle`, records
/// metrics and resets the retry budget of the key on success. Progress is
/// driven by watch events on the config and the deployments it owns.
pub async fn reconcile(
    config: Arc<DeploymentConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start_time = std::time::Instant::now();
    let key = config_key(&config);

    let result = handle(&config, &ctx).await;
    let duration_secs = start_time.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            ctx.requeue.forget(&key);
            if let Some(ref metrics) = ctx.metrics {
                metrics.record_reconciliation(outcome.label(), duration_secs);
                let version = match &outcome {
                    ReconcileOutcome::VersionSynced(v) | ReconcileOutcome::TriggerFired(v) => *v,
                    _ => config.latest_version(),
                };
                metrics.set_latest_version(
                    &config.namespace().unwrap_or_default(),
                    &config.name_any(),
                    version,
                );
            }
            debug!(config = ?key, outcome = ?outcome, "Reconciled DeploymentConfig");
            Ok(Action::await_change())
        }
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.record_reconciliation_error(e.label(), duration_secs);
            }
            Err(e)
        }
    }
}

/// Error policy for the controller
///
/// Transient errors are requeued with backoff until the key's retry budget
/// is spent. Fatal errors are not retried.
pub fn error_policy(
    config: Arc<DeploymentConfig>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    let key = config_key(&config);
    match ctx.requeue.on_error(&key, error.is_fatal()) {
        RequeueDecision::Retry(delay) => {
            warn!(config = ?key, error = %error, delay_ms = delay.as_millis() as u64, "Reconcile error (will retry)");
            Action::requeue(delay)
        }
        RequeueDecision::Drop => {
            warn!(config = ?key, error = %error, "Dropping DeploymentConfig out of the queue");
            Action::await_change()
        }
        RequeueDecision::Forget => {
            error!(config = ?key, error = %error, "Fatal error, not retrying");
            Action::await_change()
        }
    }
}

/// One level-triggered pass over a DeploymentConfig
///
/// Decides, from the config and the deployments it owns, whether to cancel
/// older rollouts, mint a version, create its deployment, or reconcile
/// replicas, and writes status back when it changed.
pub async fn handle(
    config: &DeploymentConfig,
    ctx: &Context,
) -> Result<ReconcileOutcome, ReconcileError> {
    let namespace = config
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = config.name_any();
    let key = config_key(config);
    let uid = config.uid().ok_or(ReconcileError::MissingUid)?;

    info!(config = ?name, namespace = ?namespace, version = config.latest_version(), "Reconciling DeploymentConfig");

    // Nothing can be deployed until a trigger mints the first version
    if config.latest_version() == 0 && config.spec.triggers.is_empty() {
        update_status(ctx, config, &[], true, &[]).await?;
        return Ok(ReconcileOutcome::NoOp);
    }

    let store = ctx.store.as_ref();
    let candidates = store.list_deployments(&namespace).await?;

    let owner = config_owner_ref(config).ok_or(ReconcileError::MissingUid)?;
    let control = DeploymentControl::new(store, &namespace);
    let adoption = ConfigAdoptionCheck::new(store, &namespace, &name, &uid);
    let deleting = config.meta().deletion_timestamp.is_some();
    let manager = RefManager::<ReplicationController>::new(owner, deleting, &control, &adoption);
    let matches = |d: &ReplicationController| matches_config(d, &name);

    let (mut deployments, claim_errors) = manager.claim(candidates, &matches).await;
    if let Some(source) = claim_errors {
        return Err(ReconcileError::Claim {
            config: key,
            source,
        });
    }

    if deleting {
        // Deleted configs never come back through error_policy
        ctx.requeue.forget(&key);
        update_status(ctx, config, &deployments, true, &[]).await?;
        return Ok(ReconcileOutcome::Deleting);
    }

    let (latest_is_deployed, newest) = latest_deployment_info(config, &deployments);

    // A deployment newer than status means status was lost; catch up first
    if let Some(version) = newest.and_then(|d| d.version()) {
        if version > config.latest_version() {
            info!(config = ?name, from = config.latest_version(), to = version, "Syncing latest version with existing deployment");
            let mut updated = config.clone();
            updated.status.get_or_insert_with(Default::default).latest_version = version;
            store.update_config_status(&updated).await?;
            return Ok(ReconcileOutcome::VersionSynced(version));
        }
    }

    let latest = if latest_is_deployed {
        newest.cloned()
    } else {
        None
    };

    if !latest_is_deployed {
        cancel_running_deployments(ctx, config, &namespace, &deployments, &manager, &matches)
            .await?;
    }

    if has_unresolved_images(config) {
        debug!(config = ?name, "Postponing rollout, template has containers without image");
        update_status(ctx, config, &deployments, true, &[]).await?;
        return Ok(ReconcileOutcome::WaitingOnInput);
    }

    match trigger_activated(
        config,
        latest_is_deployed,
        latest.as_ref(),
        has_latest_pod_template,
    ) {
        TriggerDecision::Trigger(details) => {
            let version = bump_latest_version(ctx, config, details).await?;
            return Ok(ReconcileOutcome::TriggerFired(version));
        }
        TriggerDecision::Skip if config.latest_version() == 0 => {
            update_status(ctx, config, &deployments, true, &[]).await?;
            return Ok(ReconcileOutcome::WaitingOnInput);
        }
        TriggerDecision::Skip | TriggerDecision::Idle => {}
    }

    if let Some(latest) = latest {
        // Never compete with the deployer while it is rolling out
        if !latest.is_terminal() {
            update_status(ctx, config, &deployments, false, &[]).await?;
            return Ok(ReconcileOutcome::RolloutInProgress);
        }
        reconcile_deployments(ctx, config, deployments, &manager, &matches).await?;
        return Ok(ReconcileOutcome::Reconciled);
    }

    if config.spec.paused {
        prune(ctx, config, &deployments).await;
        update_status(ctx, config, &deployments, true, &[]).await?;
        return Ok(ReconcileOutcome::Paused);
    }

    let deployment = match make_deployment(config) {
        Ok(d) => d,
        Err(e) => {
            let message = format!("Couldn't make deployment from (potentially invalid) deployment config: {}", e);
            fail_creation(ctx, config, &deployments, &message).await;
            return Err(ReconcileError::Fatal(message));
        }
    };
    let deployment_name = deployment.name_any();
    let version = config.latest_version();

    match store.create_deployment(&namespace, &deployment).await {
        Ok(created) => {
            let message = format!(
                "Created new replication controller {:?} for version {}",
                deployment_name, version
            );
            info!(config = ?name, deployment = ?deployment_name, version = version, "Created deployment");
            ctx.recorder
                .record(
                    config,
                    EventKind::Normal,
                    reasons::DEPLOYMENT_CREATED,
                    message.clone(),
                )
                .await;
            deployments.push(created);
            prune(ctx, config, &deployments).await;
            let condition = new_condition(
                ConditionType::Progressing,
                ConditionStatus::True,
                Some(NEW_RC_CREATED_REASON),
                message,
                ctx.clock.now(),
            );
            update_status(ctx, config, &deployments, true, &[condition]).await?;
            Ok(ReconcileOutcome::Created(deployment_name))
        }
        Err(e) if e.is_already_exists() => {
            // The list may have lagged behind a deployment we created earlier
            let existing = match store.get_deployment(&namespace, &deployment_name).await {
                Ok(d) => d,
                Err(e) => {
                    let message = format!("Couldn't deploy version {}: {}", version, e);
                    fail_creation(ctx, config, &deployments, &message).await;
                    return Err(e.into());
                }
            };
            let claimed = match manager.claim_object(&existing, &matches).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    let message = format!("Couldn't deploy version {}: {}", version, e);
                    fail_creation(ctx, config, &deployments, &message).await;
                    return Err(e.into());
                }
            };
            if claimed {
                debug!(config = ?name, deployment = ?deployment_name, "Deployment already exists and is owned");
                deployments.push(existing);
                update_status(ctx, config, &deployments, true, &[]).await?;
                return Ok(ReconcileOutcome::Created(deployment_name));
            }
            let message = format!(
                "replication controller {:?} already exists and deployment config is not allowed to claim it",
                deployment_name
            );
            fail_creation(ctx, config, &deployments, &message).await;
            Err(ReconcileError::Fatal(message))
        }
        Err(source) => {
            let message = format!("Couldn't deploy version {}: {}", version, source);
            fail_creation(ctx, config, &deployments, &message).await;
            Err(ReconcileError::CreateFailed {
                config: key,
                source,
            })
        }
    }
}

/// Write the status computed from `deployments` if it differs from the current one
pub async fn update_status(
    ctx: &Context,
    config: &DeploymentConfig,
    deployments: &[ReplicationController],
    update_observed_generation: bool,
    additional: &[DeploymentCondition],
) -> Result<(), ReconcileError> {
    let desired = calculate_status(
        config,
        deployments,
        update_observed_generation,
        ctx.clock.now(),
        additional,
    );
    if config.status.as_ref() == Some(&desired) {
        return Ok(());
    }

    info!(
        config = ?config.name_any(),
        latest_version = desired.latest_version,
        replicas = desired.replicas,
        updated_replicas = desired.updated_replicas,
        available_replicas = desired.available_replicas,
        unavailable_replicas = desired.unavailable_replicas,
        "Updating DeploymentConfig status"
    );
    let mut updated = config.clone();
    updated.status = Some(desired);
    ctx.store.update_config_status(&updated).await?;
    Ok(())
}

/// Record a failed creation as an event and a Progressing=False condition
async fn fail_creation(
    ctx: &Context,
    config: &DeploymentConfig,
    deployments: &[ReplicationController],
    message: &str,
) {
    warn!(config = ?config.name_any(), message = %message, "Deployment creation failed");
    ctx.recorder
        .record(
            config,
            EventKind::Warning,
            reasons::DEPLOYMENT_CREATION_FAILED,
            message.to_string(),
        )
        .await;
    let condition = new_condition(
        ConditionType::Progressing,
        ConditionStatus::False,
        Some(RC_CREATE_ERROR_REASON),
        message.to_string(),
        ctx.clock.now(),
    );
    if let Err(e) = update_status(ctx, config, deployments, true, &[condition]).await {
        warn!(config = ?config.name_any(), error = %e, "Failed to record creation failure in status");
    }
}

async fn prune(ctx: &Context, config: &DeploymentConfig, deployments: &[ReplicationController]) {
    if let Err(e) = cleanup_old_deployments(ctx.store.as_ref(), config, deployments).await {
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
}

async fn bump_latest_version(
    ctx: &Context,
    config: &DeploymentConfig,
    details: DeploymentDetails,
) -> Result<i64, ReconcileError> {
    let mut updated = config.clone();
    let status = updated.status.get_or_insert_with(Default::default);
    status.latest_version += 1;
    status.details = Some(details);
    let version = status.latest_version;

    ctx.store.update_config_status(&updated).await?;
    info!(
        config = ?config.name_any(),
        version = version,
        cause = ?updated.status.as_ref().and_then(|s| s.details.as_ref()).and_then(|d| d.message.as_ref()),
        "Triggered new version"
    );
    Ok(version)
}

/// Cancel every running deployment before a new version may be created
///
/// Fails with `AwaitingCancellation` while any non-terminal deployment
/// exists, cancelled or not; the next pass proceeds once they all finished.
async fn cancel_running_deployments<F>(
    ctx: &Context,
    config: &DeploymentConfig,
    namespace: &str,
    deployments: &[ReplicationController],
    manager: &RefManager<'_, ReplicationController>,
    matches: &F,
) -> Result<(), ReconcileError>
where
    F: Fn(&ReplicationController) -> bool + Send + Sync,
{
    let store = ctx.store.as_ref();
    let mut awaiting_cancellation = false;

    for deployment in deployments.iter().filter(|d| !d.is_terminal()) {
        awaiting_cancellation = true;
        if deployment.is_cancelled() {
            continue;
        }

        let name = deployment.name_any();
        let name_ref = name.as_str();
        let result = retry_on_conflict(DEFAULT_CONFLICT_BACKOFF, move || async move {
            let mut fresh = match store.get_deployment(namespace, name_ref).await {
                Ok(d) => d,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(ReconcileError::from(e)),
            };
            if !manager.claim_object(&fresh, matches).await? {
                return Ok(None);
            }
            if fresh.is_cancelled() {
                return Ok(Some(fresh));
            }
            fresh.cancel(CANCELLED_BY_NEWER_REASON);
            Ok(Some(store.update_deployment(namespace, &fresh).await?))
        })
        .await;

        match result {
            Ok(Some(_)) => {
                info!(config = ?config.name_any(), deployment = ?name, "Cancelled running deployment");
                ctx.recorder
                    .record(
                        config,
                        EventKind::Normal,
                        reasons::DEPLOYMENT_CANCELLED,
                        format!(
                            "Cancelled deployment {:?} superseded by version {}",
                            name,
                            config.latest_version()
                        ),
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                ctx.recorder
                    .record(
                        config,
                        EventKind::Warning,
                        reasons::DEPLOYMENT_CANCELLATION_FAILED,
                        format!("Failed to cancel deployment {:?} superseded by version {}: {}", name, config.latest_version(), e),
                    )
                    .await;
                return Err(e);
            }
        }
    }

    if awaiting_cancellation {
        ctx.recorder
            .record(
                config,
                EventKind::Normal,
                reasons::DEPLOYMENT_AWAITING_CANCELLATION,
                "Deployment of version awaiting cancellation of older running deployments"
                    .to_string(),
            )
            .await;
        return Err(ReconcileError::AwaitingCancellation(config_key(config)));
    }
    Ok(())
}
