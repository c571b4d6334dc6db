use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DeploymentConfig describes a versioned rollout of a pod template
///
/// Every accepted change to the template (or to a watched image) mints a new
/// version, realized as its own ReplicationController named `{name}-{version}`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "apps.versio.io",
    version = "v1",
    kind = "DeploymentConfig",
    namespaced,
    shortname = "dc",
    status = "DeploymentConfigStatus",
    printcolumn = r#"{"name":"Revision", "type":"integer", "jsonPath":".status.latestVersion"}"#,
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct DeploymentConfigSpec {
    /// Number of desired pods for the active deployment
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Labels used to find the deployments of this config
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Template describes the pods of every deployment
    pub template: PodTemplateSpec,

    /// Triggers that mint a new version automatically
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<DeploymentTriggerPolicy>,

    /// How the deployer rolls a new version out
    #[serde(default)]
    pub strategy: DeploymentStrategy,

    /// Seconds a new pod must be ready before it counts as available
    #[serde(rename = "minReadySeconds", default)]
    pub min_ready_seconds: i32,

    /// Paused configs never create new deployments
    #[serde(default)]
    pub paused: bool,

    /// Test configs are scaled to zero once their rollout has finished
    #[serde(default)]
    pub test: bool,

    /// Number of old, scaled down deployments to retain (unset keeps all)
    #[serde(
        rename = "revisionHistoryLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_history_limit: Option<i32>,
}

fn default_replicas() -> i32 {
    1
}

/// A trigger that causes a new version to be minted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DeploymentTriggerPolicy {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,

    /// Only set for ImageChange triggers
    #[serde(rename = "imageChangeParams", skip_serializing_if = "Option::is_none")]
    pub image_change_params: Option<ImageChangeParams>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum TriggerType {
    /// Any change to the pod template mints a version
    ConfigChange,
    /// A new image on a watched stream mints a version
    ImageChange,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ImageChangeParams {
    /// Whether new images are applied to the template without user action
    #[serde(default)]
    pub automatic: bool,

    /// Containers whose image is driven by this trigger
    #[serde(rename = "containerNames", default)]
    pub container_names: Vec<String>,

    /// Image stream tag being watched
    pub from: ImageReference,

    /// The last image that was resolved for this trigger
    #[serde(
        rename = "lastTriggeredImage",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_triggered_image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ImageReference {
    #[serde(default = "default_image_kind")]
    pub kind: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_image_kind() -> String {
    "ImageStreamTag".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentStrategy {
    #[serde(rename = "type", default)]
    pub strategy_type: StrategyType,

    #[serde(rename = "rollingParams", skip_serializing_if = "Option::is_none")]
    pub rolling_params: Option<RollingDeploymentParams>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum StrategyType {
    #[default]
    Rolling,
    Recreate,
    Custom,
}

/// Parameters of a rolling rollout
///
/// Values can be an absolute number (e.g., "5") or percentage (e.g., "25%").
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RollingDeploymentParams {
    /// Defaults to "25%" when not specified
    #[serde(rename = "maxSurge", skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<String>,

    /// Defaults to "25%" when not specified
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<String>,

    #[serde(rename = "timeoutSeconds", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

/// Status of a DeploymentConfig, owned by the controller
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentConfigStatus {
    /// Version of the most recently minted deployment
    #[serde(rename = "latestVersion", default)]
    pub latest_version: i64,

    #[serde(rename = "observedGeneration", default)]
    pub observed_generation: i64,

    /// Total pods across all deployments of this config
    #[serde(default)]
    pub replicas: i32,

    /// Pods of the latest version
    #[serde(rename = "updatedReplicas", default)]
    pub updated_replicas: i32,

    #[serde(rename = "availableReplicas", default)]
    pub available_replicas: i32,

    #[serde(rename = "readyReplicas", default)]
    pub ready_replicas: i32,

    #[serde(rename = "unavailableReplicas", default)]
    pub unavailable_replicas: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DeploymentCondition>,

    /// Why the latest version was minted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<DeploymentDetails>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DeploymentCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    pub status: ConditionStatus,

    /// RFC3339 timestamp of the last update
    #[serde(rename = "lastUpdateTime", skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    /// RFC3339 timestamp of the last status change
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, JsonSchema,
)]
pub enum ConditionType {
    Available,
    Progressing,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct DeploymentDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<DeploymentCause>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DeploymentCause {
    #[serde(rename = "type")]
    pub cause_type: TriggerType,

    #[serde(rename = "imageTrigger", skip_serializing_if = "Option::is_none")]
    pub image_trigger: Option<ImageTriggerCause>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ImageTriggerCause {
    pub from: ImageReference,
}

impl DeploymentConfig {
    /// Latest minted version, 0 before the first trigger fired
    pub fn latest_version(&self) -> i64 {
        self.status.as_ref().map(|s| s.latest_version).unwrap_or(0)
    }

    /// Whether a ConfigChange trigger is configured
    pub fn has_config_change_trigger(&self) -> bool {
        self.spec
            .triggers
            .iter()
            .any(|t| t.trigger_type == TriggerType::ConfigChange)
    }

    /// Image change parameters of every ImageChange trigger
    pub fn image_triggers(&self) -> impl Iterator<Item = &ImageChangeParams> {
        self.spec
            .triggers
            .iter()
            .filter(|t| t.trigger_type == TriggerType::ImageChange)
            .filter_map(|t| t.image_change_params.as_ref())
    }
}
