//! Decides whether a new version of a config should be minted

use super::deployment::{DeploymentExt, ENCODED_CONFIG_ANNOTATION};
use crate::crd::deployment_config::{
    DeploymentCause, DeploymentConfig, DeploymentDetails, ImageTriggerCause, TriggerType,
};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ReplicationController};
use kube::ResourceExt;
use std::collections::BTreeSet;
use thiserror::Error;

/// Outcome of trigger evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    /// Nothing to do
    Idle,
    /// Inputs are not ready, evaluate again later
    Skip,
    /// Mint a new version, recording why
    Trigger(DeploymentDetails),
}

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("deployment {0} has no encoded config")]
    Missing(String),

    #[error("failed to decode config of deployment {name}: {reason}")]
    Decode { name: String, reason: String },
}

/// Evaluate the config's triggers against its latest deployment
///
/// `template_matches` reports whether the deployment was rendered from the
/// config's current pod template. A failed comparison never triggers.
pub fn trigger_activated<F>(
    config: &DeploymentConfig,
    latest_is_deployed: bool,
    latest: Option<&ReplicationController>,
    template_matches: F,
) -> TriggerDecision
where
    F: Fn(&DeploymentConfig, &ReplicationController) -> Result<bool, TemplateError>,
{
    if config.spec.paused || config.spec.triggers.is_empty() {
        return TriggerDecision::Idle;
    }

    let has_image_triggers = config.image_triggers().next().is_some();

    if config.latest_version() == 0 {
        if has_image_triggers {
            if has_last_triggered_image(config) {
                return TriggerDecision::Trigger(image_change_details(config));
            }
            return TriggerDecision::Skip;
        }
        if config.has_config_change_trigger() {
            return TriggerDecision::Trigger(config_change_details());
        }
        return TriggerDecision::Idle;
    }

    let latest = match latest {
        Some(d) if latest_is_deployed => d,
        // The creation of the latest version has not been observed yet
        _ => return TriggerDecision::Skip,
    };

    // Never mint a version while the deployer is still rolling one out
    if !latest.is_terminal() {
        return TriggerDecision::Idle;
    }

    let config_changed = if config.has_config_change_trigger() {
        match template_matches(config, latest) {
            Ok(matches) => !matches,
            Err(_) => return TriggerDecision::Skip,
        }
    } else {
        false
    };

    if config_changed {
        return TriggerDecision::Trigger(config_change_details());
    }
    if has_image_triggers && has_updated_images(config, latest) {
        return TriggerDecision::Trigger(image_change_details(config));
    }
    TriggerDecision::Idle
}

/// Whether every image trigger has resolved an image
pub fn has_last_triggered_image(config: &DeploymentConfig) -> bool {
    let mut triggers = config.image_triggers().peekable();
    triggers.peek().is_some()
        && triggers.all(|p| {
            p.last_triggered_image
                .as_deref()
                .map(|i| !i.is_empty())
                .unwrap_or(false)
        })
}

/// Whether the config uses an image the deployment was not rendered with
pub fn has_updated_images(config: &DeploymentConfig, deployment: &ReplicationController) -> bool {
    let deployed: BTreeSet<&str> = deployment.images().into_iter().collect();
    config
        .spec
        .template
        .spec
        .as_ref()
        .map(|p| {
            p.containers
                .iter()
                .any(|c| !deployed.contains(c.image.as_deref().unwrap_or_default()))
        })
        .unwrap_or(false)
}

/// Whether any container has no image yet
pub fn has_unresolved_images(config: &DeploymentConfig) -> bool {
    config
        .spec
        .template
        .spec
        .as_ref()
        .map(|p| {
            p.containers
                .iter()
                .any(|c| c.image.as_deref().map(str::trim).unwrap_or_default().is_empty())
        })
        .unwrap_or(false)
}

/// Compare the template encoded on a deployment with the config's current one
pub fn has_latest_pod_template(
    config: &DeploymentConfig,
    deployment: &ReplicationController,
) -> Result<bool, TemplateError> {
    let name = deployment.name_any();
    let encoded = deployment
        .annotations()
        .get(ENCODED_CONFIG_ANNOTATION)
        .ok_or_else(|| TemplateError::Missing(name.clone()))?;
    let decoded: PodTemplateSpec =
        serde_json::from_str(encoded).map_err(|e| TemplateError::Decode {
            name,
            reason: e.to_string(),
        })?;
    Ok(decoded == config.spec.template)
}

fn config_change_details() -> DeploymentDetails {
    DeploymentDetails {
        message: Some("config change".to_string()),
        causes: vec![DeploymentCause {
            cause_type: TriggerType::ConfigChange,
            image_trigger: None,
        }],
    }
}

fn image_change_details(config: &DeploymentConfig) -> DeploymentDetails {
    DeploymentDetails {
        message: Some("image change".to_string()),
        causes: config
            .image_triggers()
            .map(|p| DeploymentCause {
                cause_type: TriggerType::ImageChange,
                image_trigger: Some(ImageTriggerCause {
                    from: p.from.clone(),
                }),
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "triggers_test.rs"]
mod tests;
