use super::deployment_config::*;
use kube::CustomResourceExt;

const FULL_CONFIG: &str = r#"
apiVersion: apps.versio.io/v1
kind: DeploymentConfig
metadata:
  name: frontend
  namespace: shop
spec:
  replicas: 3
  selector:
    app: frontend
  template:
    metadata:
      labels:
        app: frontend
    spec:
      containers:
      - name: web
        image: ""
  triggers:
  - type: ConfigChange
  - type: ImageChange
    imageChangeParams:
      automatic: true
      containerNames:
      - web
      from:
        name: frontend:latest
      lastTriggeredImage: registry.local/frontend@sha256:abc
  strategy:
    type: Rolling
    rollingParams:
      maxSurge: "50%"
      maxUnavailable: "1"
      timeoutSeconds: 600
  minReadySeconds: 10
  revisionHistoryLimit: 5
status:
  latestVersion: 7
  observedGeneration: 4
  replicas: 3
  availableReplicas: 2
  conditions:
  - type: Available
    status: "False"
    message: Deployment config does not have minimum availability.
  details:
    message: image change
    causes:
    - type: ImageChange
      imageTrigger:
        from:
          kind: ImageStreamTag
          name: frontend:latest
"#;

#[test]
fn test_deserialize_full_config_from_yaml() {
    let config: DeploymentConfig =
        serde_yaml::from_str(FULL_CONFIG).expect("Failed to deserialize DeploymentConfig");

    assert_eq!(config.metadata.name.as_deref(), Some("frontend"));
    assert_eq!(config.spec.replicas, 3);
    assert_eq!(config.spec.selector.get("app").map(String::as_str), Some("frontend"));
    assert_eq!(config.spec.min_ready_seconds, 10);
    assert_eq!(config.spec.revision_history_limit, Some(5));
    assert!(!config.spec.paused);
    assert!(!config.spec.test);

    assert_eq!(config.spec.triggers.len(), 2);
    assert!(config.has_config_change_trigger());
    let images: Vec<_> = config.image_triggers().collect();
    assert_eq!(images.len(), 1);
    assert!(images[0].automatic);
    assert_eq!(images[0].container_names, vec!["web".to_string()]);
    assert_eq!(images[0].from.kind, "ImageStreamTag", "kind defaults to ImageStreamTag");
    assert_eq!(
        images[0].last_triggered_image.as_deref(),
        Some("registry.local/frontend@sha256:abc")
    );

    let rolling = config.spec.strategy.rolling_params.as_ref().unwrap();
    assert_eq!(config.spec.strategy.strategy_type, StrategyType::Rolling);
    assert_eq!(rolling.max_surge.as_deref(), Some("50%"));
    assert_eq!(rolling.max_unavailable.as_deref(), Some("1"));
    assert_eq!(rolling.timeout_seconds, Some(600));

    let status = config.status.as_ref().unwrap();
    assert_eq!(config.latest_version(), 7);
    assert_eq!(status.observed_generation, 4);
    assert_eq!(status.conditions[0].condition_type, ConditionType::Available);
    assert_eq!(status.conditions[0].status, ConditionStatus::False);
    let details = status.details.as_ref().unwrap();
    assert_eq!(details.causes[0].cause_type, TriggerType::ImageChange);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let yaml = r#"
apiVersion: apps.versio.io/v1
kind: DeploymentConfig
metadata:
  name: minimal
spec:
  template:
    spec:
      containers:
      - name: app
        image: nginx:1.25
"#;

    let config: DeploymentConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.spec.replicas, 1, "replicas default to 1");
    assert!(config.spec.triggers.is_empty());
    assert_eq!(config.spec.strategy.strategy_type, StrategyType::Rolling);
    assert_eq!(config.spec.revision_history_limit, None);
    assert_eq!(config.latest_version(), 0, "no status means version 0");
    assert!(!config.has_config_change_trigger());
}

#[test]
fn test_status_serializes_camel_case_and_skips_empty() {
    let status = DeploymentConfigStatus {
        latest_version: 2,
        updated_replicas: 1,
        ..Default::default()
    };

    let value = serde_json::to_value(&status).unwrap();

    assert_eq!(value["latestVersion"], 2);
    assert_eq!(value["updatedReplicas"], 1);
    assert!(value.get("conditions").is_none());
    assert!(value.get("details").is_none());
}

#[test]
fn test_trigger_type_serializes_as_type_field() {
    let trigger = DeploymentTriggerPolicy {
        trigger_type: TriggerType::ConfigChange,
        image_change_params: None,
    };

    let value = serde_json::to_value(&trigger).unwrap();

    assert_eq!(value, serde_json::json!({"type": "ConfigChange"}));
}

#[test]
fn test_crd_metadata() {
    let crd = DeploymentConfig::crd();

    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("deploymentconfigs.apps.versio.io")
    );
    assert_eq!(crd.spec.group, "apps.versio.io");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.kind, "DeploymentConfig");
    assert_eq!(
        crd.spec.names.short_names.as_deref(),
        Some(&["dc".to_string()][..])
    );
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1");
    assert!(
        version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some(),
        "status must be a subresource"
    );
}
