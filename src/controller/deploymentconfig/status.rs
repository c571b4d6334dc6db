//! Status of a DeploymentConfig, derived from its deployments
//!
//! Everything here is a pure function of the config, its deployments and the
//! current time. Conditions keep their lastTransitionTime while their status
//! is unchanged and are left untouched while status and reason are unchanged,
//! so recomputing an unchanged world yields an equal status.

use super::deployment::{deployer_pod_name, DeploymentExt, DeploymentPhase};
use crate::crd::deployment_config::{
    ConditionStatus, ConditionType, DeploymentCondition, DeploymentConfig, DeploymentConfigStatus,
    StrategyType,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ReplicationController;
use kube::ResourceExt;

pub const NEW_RC_CREATED_REASON: &str = "NewReplicationControllerCreated";
pub const RC_CREATE_ERROR_REASON: &str = "ReplicationControllerCreateError";
pub const NEW_RC_AVAILABLE_REASON: &str = "NewReplicationControllerAvailable";
pub const RC_UPDATED_REASON: &str = "ReplicationControllerUpdated";
pub const TIMED_OUT_REASON: &str = "ProgressDeadlineExceeded";
pub const CANCELLED_ROLLOUT_REASON: &str = "RolloutCancelled";

const AVAILABLE_MESSAGE: &str = "Deployment config has minimum availability.";
const UNAVAILABLE_MESSAGE: &str = "Deployment config does not have minimum availability.";

/// Compute the status a config should have given its deployments
///
/// `update_observed_generation` is false while the latest rollout is still
/// running, since the current generation has not been acted upon yet.
/// `additional` conditions are applied last and win over computed ones.
pub fn calculate_status(
    config: &DeploymentConfig,
    deployments: &[ReplicationController],
    update_observed_generation: bool,
    now: DateTime<Utc>,
    additional: &[DeploymentCondition],
) -> DeploymentConfigStatus {
    let previous = config.status.clone().unwrap_or_default();
    let latest_version = config.latest_version();
    let latest = deployments
        .iter()
        .find(|d| d.version() == Some(latest_version));

    let replicas: i32 = deployments.iter().map(|d| d.status_replicas()).sum();
    let available_replicas: i32 = deployments.iter().map(|d| d.available_replicas()).sum();
    let ready_replicas: i32 = deployments.iter().map(|d| d.ready_replicas()).sum();

    let observed_generation = if update_observed_generation {
        config.metadata.generation.unwrap_or(previous.observed_generation)
    } else {
        previous.observed_generation
    };

    let mut status = DeploymentConfigStatus {
        latest_version,
        observed_generation,
        replicas,
        updated_replicas: latest.map(|d| d.status_replicas()).unwrap_or(0),
        available_replicas,
        ready_replicas,
        unavailable_replicas: (replicas - available_replicas).max(0),
        conditions: previous.conditions.clone(),
        details: previous.details.clone(),
    };

    let minimum_available = config.spec.replicas - max_unavailable(config);
    let available = if available_replicas >= minimum_available && available_replicas > 0 {
        new_condition(
            ConditionType::Available,
            ConditionStatus::True,
            None,
            AVAILABLE_MESSAGE.to_string(),
            now,
        )
    } else {
        new_condition(
            ConditionType::Available,
            ConditionStatus::False,
            None,
            UNAVAILABLE_MESSAGE.to_string(),
            now,
        )
    };
    set_condition(&mut status, available);

    if let Some(latest) = latest {
        if let Some(progressing) = progressing_condition(latest, &previous, &status, now) {
            // Every step of a running rollout is stamped with its own time
            if latest.phase() == DeploymentPhase::Running {
                remove_condition(&mut status, ConditionType::Progressing);
            }
            set_condition(&mut status, progressing);
        }
    }

    for condition in additional {
        set_condition(&mut status, condition.clone());
    }

    status
}

/// Progressing condition implied by the phase of the latest deployment
fn progressing_condition(
    latest: &ReplicationController,
    previous: &DeploymentConfigStatus,
    current: &DeploymentConfigStatus,
    now: DateTime<Utc>,
) -> Option<DeploymentCondition> {
    let name = latest.name_any();
    match latest.phase() {
        DeploymentPhase::New => None,
        DeploymentPhase::Pending => Some(new_condition(
            ConditionType::Progressing,
            ConditionStatus::Unknown,
            None,
            format!(
                "replication controller {:?} is waiting for pod {:?} to run",
                name,
                deployer_pod_name(&name)
            ),
            now,
        )),
        DeploymentPhase::Running => {
            if !is_progressing(previous, current) {
                return None;
            }
            Some(new_condition(
                ConditionType::Progressing,
                ConditionStatus::True,
                Some(RC_UPDATED_REASON),
                format!("replication controller {:?} is progressing", name),
                now,
            ))
        }
        DeploymentPhase::Failed => {
            let (reason, message) = if latest.is_cancelled() {
                (
                    CANCELLED_ROLLOUT_REASON,
                    format!("rollout of replication controller {:?} was cancelled", name),
                )
            } else {
                (
                    TIMED_OUT_REASON,
                    format!("replication controller {:?} has failed progressing", name),
                )
            };
            Some(new_condition(
                ConditionType::Progressing,
                ConditionStatus::False,
                Some(reason),
                message,
                now,
            ))
        }
        DeploymentPhase::Complete => Some(new_condition(
            ConditionType::Progressing,
            ConditionStatus::True,
            Some(NEW_RC_AVAILABLE_REASON),
            format!("replication controller {:?} successfully rolled out", name),
            now,
        )),
    }
}

/// Whether the latest rollout moved since the previous status
pub fn is_progressing(previous: &DeploymentConfigStatus, current: &DeploymentConfigStatus) -> bool {
    let previous_old = previous.replicas - previous.updated_replicas;
    let current_old = current.replicas - current.updated_replicas;
    current.updated_replicas > previous.updated_replicas || current_old < previous_old
}

pub fn new_condition(
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: Option<&str>,
    message: String,
    now: DateTime<Utc>,
) -> DeploymentCondition {
    let timestamp = now.to_rfc3339();
    DeploymentCondition {
        condition_type,
        status,
        last_update_time: Some(timestamp.clone()),
        last_transition_time: Some(timestamp),
        reason: reason.map(str::to_string),
        message: Some(message),
    }
}

pub fn get_condition(
    status: &DeploymentConfigStatus,
    condition_type: ConditionType,
) -> Option<&DeploymentCondition> {
    status
        .conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Insert or replace a condition, keeping conditions ordered by type
///
/// A condition with the same status and reason as the existing one is a
/// no-op. Same status with a new reason keeps the lastTransitionTime.
pub fn set_condition(status: &mut DeploymentConfigStatus, mut condition: DeploymentCondition) {
    if let Some(current) = get_condition(status, condition.condition_type) {
        if current.status == condition.status && current.reason == condition.reason {
            return;
        }
        if current.status == condition.status {
            condition.last_transition_time = current.last_transition_time.clone();
        }
    }
    status
        .conditions
        .retain(|c| c.condition_type != condition.condition_type);
    status.conditions.push(condition);
    status.conditions.sort_by_key(|c| c.condition_type);
}

pub fn remove_condition(status: &mut DeploymentConfigStatus, condition_type: ConditionType) {
    status
        .conditions
        .retain(|c| c.condition_type != condition_type);
}

/// Pods that may be unavailable during a rollout of this config
pub fn max_unavailable(config: &DeploymentConfig) -> i32 {
    if config.spec.strategy.strategy_type != StrategyType::Rolling {
        return 0;
    }
    let params = config.spec.strategy.rolling_params.clone().unwrap_or_default();
    let (_, unavailable) = resolve_fenceposts(
        params.max_surge.as_deref(),
        params.max_unavailable.as_deref(),
        config.spec.replicas,
    );
    unavailable
}

/// Resolve maxSurge and maxUnavailable against the desired replica count
///
/// Both default to "25%". Surge rounds up, unavailable rounds down, and if
/// both come out as zero one pod may be unavailable so the rollout can move.
pub fn resolve_fenceposts(
    max_surge: Option<&str>,
    max_unavailable: Option<&str>,
    desired: i32,
) -> (i32, i32) {
    let surge = parse_int_or_percent(max_surge.unwrap_or("25%"), desired, true);
    let unavailable = parse_int_or_percent(max_unavailable.unwrap_or("25%"), desired, false);
    if surge == 0 && unavailable == 0 {
        (0, 1)
    } else {
        (surge, unavailable)
    }
}

/// Parse an absolute value ("5") or a percentage ("25%") of `total`
///
/// Invalid, negative, or above-100% values resolve to 0.
///
/// # Examples
/// ```
/// use versio::controller::deploymentconfig::parse_int_or_percent;
/// assert_eq!(parse_int_or_percent("25%", 10, true), 3);   // 2.5 rounded up
/// assert_eq!(parse_int_or_percent("25%", 10, false), 2);  // 2.5 rounded down
/// assert_eq!(parse_int_or_percent("5", 10, false), 5);
/// assert_eq!(parse_int_or_percent("-5", 10, true), 0);
/// ```
pub fn parse_int_or_percent(value: &str, total: i32, round_up: bool) -> i32 {
    if let Some(percent_str) = value.strip_suffix('%') {
        match percent_str.parse::<i32>() {
            Ok(percent) if (0..=100).contains(&percent) => {
                let scaled = (total as f64 * percent as f64) / 100.0;
                if round_up {
                    scaled.ceil() as i32
                } else {
                    scaled.floor() as i32
                }
            }
            _ => 0,
        }
    } else {
        match value.parse::<i32>() {
            Ok(abs) if abs >= 0 => abs,
            _ => 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "status_test.rs"]
mod tests;
