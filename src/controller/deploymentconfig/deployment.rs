//! Deployments are ReplicationControllers carrying their rollout state in annotations
//!
//! `DeploymentExt` gives typed access to those annotations; `make_deployment`
//! renders a config at its latest version.

use crate::crd::deployment_config::DeploymentConfig;
use k8s_openapi::api::core::v1::{ReplicationController, ReplicationControllerSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the owning config (annotation and label)
pub const CONFIG_ANNOTATION: &str = "versio.io/deployment-config.name";
pub const VERSION_ANNOTATION: &str = "versio.io/deployment-config.latest-version";
pub const PHASE_ANNOTATION: &str = "versio.io/deployment.phase";
pub const CANCELLED_ANNOTATION: &str = "versio.io/deployment.cancelled";
pub const STATUS_REASON_ANNOTATION: &str = "versio.io/deployment.status-reason";
pub const ENCODED_CONFIG_ANNOTATION: &str = "versio.io/encoded-deployment-config";
pub const REPLICAS_ANNOTATION: &str = "versio.io/deployment.replicas";
pub const DESIRED_REPLICAS_ANNOTATION: &str = "kubectl.kubernetes.io/desired-replicas";
/// Set on pods so they can be traced back to their deployment
pub const DEPLOYMENT_ANNOTATION: &str = "versio.io/deployment.name";

pub const CONFIG_LABEL: &str = CONFIG_ANNOTATION;
pub const DEPLOYMENT_CONFIG_LABEL: &str = "deploymentconfig";
pub const DEPLOYMENT_LABEL: &str = "deployment";

pub const CANCELLED_BY_NEWER_REASON: &str =
    "The deployment was cancelled as a newer deployment was found running";

/// Lifecycle phase of a deployment, advanced by the deployer process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentPhase {
    New,
    Pending,
    Running,
    Failed,
    Complete,
}

impl DeploymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::New => "New",
            DeploymentPhase::Pending => "Pending",
            DeploymentPhase::Running => "Running",
            DeploymentPhase::Failed => "Failed",
            DeploymentPhase::Complete => "Complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "New" => Some(DeploymentPhase::New),
            "Pending" => Some(DeploymentPhase::Pending),
            "Running" => Some(DeploymentPhase::Running),
            "Failed" => Some(DeploymentPhase::Failed),
            "Complete" => Some(DeploymentPhase::Complete),
            _ => None,
        }
    }

    /// Complete and Failed deployments make no further progress on their own
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentPhase::Complete | DeploymentPhase::Failed)
    }
}

/// Typed view over the rollout annotations of a deployment
pub trait DeploymentExt {
    /// Version of the config this deployment instantiates
    fn version(&self) -> Option<i64>;
    /// Phase, or `New` when the annotation is missing or unknown
    fn phase(&self) -> DeploymentPhase;
    fn is_cancelled(&self) -> bool;
    /// Replica target recorded before the rollout started
    fn desired_replicas(&self) -> Option<i32>;
    /// Current `spec.replicas`
    fn spec_replicas(&self) -> i32;
    fn set_spec_replicas(&mut self, replicas: i32);
    fn status_replicas(&self) -> i32;
    fn available_replicas(&self) -> i32;
    fn ready_replicas(&self) -> i32;
    /// Container images baked into the pod template
    fn images(&self) -> Vec<&str>;
    /// Mark the deployment cancelled so the deployer stops it
    fn cancel(&mut self, reason: &str);

    fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}

impl DeploymentExt for ReplicationController {
    fn version(&self) -> Option<i64> {
        self.annotations()
            .get(VERSION_ANNOTATION)
            .and_then(|v| v.parse().ok())
    }

    fn phase(&self) -> DeploymentPhase {
        self.annotations()
            .get(PHASE_ANNOTATION)
            .and_then(|v| DeploymentPhase::parse(v))
            .unwrap_or(DeploymentPhase::New)
    }

    fn is_cancelled(&self) -> bool {
        self.annotations()
            .get(CANCELLED_ANNOTATION)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    fn desired_replicas(&self) -> Option<i32> {
        self.annotations()
            .get(DESIRED_REPLICAS_ANNOTATION)
            .and_then(|v| v.parse().ok())
    }

    fn spec_replicas(&self) -> i32 {
        self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
    }

    fn set_spec_replicas(&mut self, replicas: i32) {
        self.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    }

    fn status_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.replicas).unwrap_or(0)
    }

    fn available_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0)
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }

    fn images(&self) -> Vec<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .and_then(|t| t.spec.as_ref())
            .map(|p| {
                p.containers
                    .iter()
                    .filter_map(|c| c.image.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn cancel(&mut self, reason: &str) {
        let annotations = self.annotations_mut();
        annotations.insert(CANCELLED_ANNOTATION.to_string(), "true".to_string());
        annotations.insert(STATUS_REASON_ANNOTATION.to_string(), reason.to_string());
    }
}

/// Name of the deployment for a given config version
pub fn deployment_name(config_name: &str, version: i64) -> String {
    format!("{}-{}", config_name, version)
}

/// Name of the pod that runs the rollout of a deployment
pub fn deployer_pod_name(deployment_name: &str) -> String {
    format!("{}-deploy", deployment_name)
}

/// Whether the deployment carries the config-name label of `config_name`
pub fn matches_config(deployment: &ReplicationController, config_name: &str) -> bool {
    deployment
        .labels()
        .get(CONFIG_LABEL)
        .map(|v| v == config_name)
        .unwrap_or(false)
}

/// Deployments ordered by version, oldest first
pub fn sort_by_version(deployments: &mut [ReplicationController]) {
    deployments.sort_by_key(|d| d.version().unwrap_or(0));
}

/// The newest deployment and whether it instantiates the config's latest version
pub fn latest_deployment_info<'a>(
    config: &DeploymentConfig,
    deployments: &'a [ReplicationController],
) -> (bool, Option<&'a ReplicationController>) {
    let latest = deployments
        .iter()
        .max_by_key(|d| d.version().unwrap_or(0));
    match latest {
        Some(d) if d.version() == Some(config.latest_version()) => (true, Some(d)),
        other => (false, other),
    }
}

/// Most recent deployment that completed successfully
pub fn active_deployment(deployments: &[ReplicationController]) -> Option<&ReplicationController> {
    deployments
        .iter()
        .filter(|d| d.phase() == DeploymentPhase::Complete)
        .max_by_key(|d| d.version().unwrap_or(0))
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("DeploymentConfig {0} has no uid")]
    MissingUid(String),

    #[error("failed to encode pod template: {0}")]
    Encode(String),
}

/// Controller reference a config places on the deployments it owns
///
/// Foreground deletion of the config waits for its deployments.
pub fn config_owner_ref(config: &DeploymentConfig) -> Option<OwnerReference> {
    Some(OwnerReference {
        block_owner_deletion: Some(true),
        ..config.controller_owner_ref(&())?
    })
}

/// Render the deployment for the config's latest version
///
/// The deployment starts at zero replicas; the deployer scales it to the
/// desired count recorded in its annotations.
pub fn make_deployment(config: &DeploymentConfig) -> Result<ReplicationController, RenderError> {
    let config_name = config.name_any();
    let version = config.latest_version();
    let name = deployment_name(&config_name, version);

    let owner = config_owner_ref(config)
        .ok_or_else(|| RenderError::MissingUid(config_name.clone()))?;

    let encoded = serde_json::to_string(&config.spec.template)
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    let mut selector = config.spec.selector.clone();
    selector.insert(DEPLOYMENT_CONFIG_LABEL.to_string(), config_name.clone());
    selector.insert(DEPLOYMENT_LABEL.to_string(), name.clone());

    let mut template = config.spec.template.clone();
    let pod_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    let pod_labels = pod_meta.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in &selector {
        pod_labels.insert(k.clone(), v.clone());
    }
    let pod_annotations = pod_meta.annotations.get_or_insert_with(BTreeMap::new);
    pod_annotations.insert(DEPLOYMENT_ANNOTATION.to_string(), name.clone());
    pod_annotations.insert(CONFIG_ANNOTATION.to_string(), config_name.clone());
    pod_annotations.insert(VERSION_ANNOTATION.to_string(), version.to_string());

    let mut labels = config.labels().clone();
    labels.insert(CONFIG_LABEL.to_string(), config_name.clone());

    let mut annotations = BTreeMap::from([
        (CONFIG_ANNOTATION.to_string(), config_name.clone()),
        (
            PHASE_ANNOTATION.to_string(),
            DeploymentPhase::New.as_str().to_string(),
        ),
        (ENCODED_CONFIG_ANNOTATION.to_string(), encoded),
        (VERSION_ANNOTATION.to_string(), version.to_string()),
        (
            DESIRED_REPLICAS_ANNOTATION.to_string(),
            config.spec.replicas.to_string(),
        ),
        (REPLICAS_ANNOTATION.to_string(), "0".to_string()),
    ]);
    if let Some(message) = config
        .status
        .as_ref()
        .and_then(|s| s.details.as_ref())
        .and_then(|d| d.message.as_ref())
    {
        annotations.insert(STATUS_REASON_ANNOTATION.to_string(), message.clone());
    }

    Ok(ReplicationController {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: config.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ReplicationControllerSpec {
            replicas: Some(0),
            min_ready_seconds: Some(config.spec.min_ready_seconds),
            selector: Some(selector),
            template: Some(template),
        }),
        status: None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "deployment_test.rs"]
mod tests;
