use super::*;
use crate::controller::testing::*;
use crate::crd::deployment_config::DeploymentDetails;

#[test]
fn test_make_deployment_renders_latest_version() {
    let config = test_config(3, 2);

    let deployment = make_deployment(&config).unwrap();

    assert_eq!(deployment.name_any(), "config-3");
    assert_eq!(deployment.namespace().as_deref(), Some(NAMESPACE));
    assert_eq!(deployment.version(), Some(3));
    assert_eq!(deployment.phase(), DeploymentPhase::New);
    assert_eq!(deployment.desired_replicas(), Some(2));
    assert_eq!(deployment.spec_replicas(), 0, "deployer scales it up");
    assert!(!deployment.is_cancelled());
    assert!(matches_config(&deployment, CONFIG_NAME));

    let owner = deployment.owner_references().first().cloned().unwrap();
    assert_eq!(owner.uid, CONFIG_UID);
    assert_eq!(owner.controller, Some(true));
    assert_eq!(owner.block_owner_deletion, Some(true));
    assert_eq!(owner.kind, "DeploymentConfig");
}

#[test]
fn test_make_deployment_selector_and_pod_labels() {
    let config = test_config(1, 1);

    let deployment = make_deployment(&config).unwrap();
    let spec = deployment.spec.as_ref().unwrap();
    let selector = spec.selector.as_ref().unwrap();

    assert_eq!(selector.get("app").map(String::as_str), Some("web"));
    assert_eq!(
        selector.get(DEPLOYMENT_CONFIG_LABEL).map(String::as_str),
        Some(CONFIG_NAME)
    );
    assert_eq!(
        selector.get(DEPLOYMENT_LABEL).map(String::as_str),
        Some("config-1")
    );

    let pod_meta = spec.template.as_ref().unwrap().metadata.as_ref().unwrap();
    let pod_labels = pod_meta.labels.as_ref().unwrap();
    for (k, v) in selector {
        assert_eq!(pod_labels.get(k), Some(v), "pod label {} must match selector", k);
    }
    let pod_annotations = pod_meta.annotations.as_ref().unwrap();
    assert_eq!(
        pod_annotations.get(DEPLOYMENT_ANNOTATION).map(String::as_str),
        Some("config-1")
    );
}

#[test]
fn test_make_deployment_encodes_template() {
    let config = test_config(1, 1);

    let deployment = make_deployment(&config).unwrap();
    let encoded = deployment.annotations().get(ENCODED_CONFIG_ANNOTATION).unwrap();
    let decoded: k8s_openapi::api::core::v1::PodTemplateSpec =
        serde_json::from_str(encoded).unwrap();

    assert_eq!(decoded, config.spec.template);
}

#[test]
fn test_make_deployment_records_trigger_message() {
    let mut config = test_config(2, 1);
    config.status.as_mut().unwrap().details = Some(DeploymentDetails {
        message: Some("image change".to_string()),
        causes: vec![],
    });

    let deployment = make_deployment(&config).unwrap();

    assert_eq!(
        deployment
            .annotations()
            .get(STATUS_REASON_ANNOTATION)
            .map(String::as_str),
        Some("image change")
    );
}

#[test]
fn test_make_deployment_requires_uid() {
    let mut config = test_config(1, 1);
    config.metadata.uid = None;

    assert!(matches!(
        make_deployment(&config),
        Err(RenderError::MissingUid(_))
    ));
}

#[test]
fn test_phase_defaults_to_new() {
    let mut deployment = make_deployment(&test_config(1, 1)).unwrap();
    deployment
        .annotations_mut()
        .insert(PHASE_ANNOTATION.to_string(), "Bogus".to_string());

    assert_eq!(deployment.phase(), DeploymentPhase::New);
    assert!(!deployment.is_terminal());
}

#[test]
fn test_terminal_phases() {
    assert!(DeploymentPhase::Complete.is_terminal());
    assert!(DeploymentPhase::Failed.is_terminal());
    assert!(!DeploymentPhase::New.is_terminal());
    assert!(!DeploymentPhase::Pending.is_terminal());
    assert!(!DeploymentPhase::Running.is_terminal());
    for phase in [
        DeploymentPhase::New,
        DeploymentPhase::Pending,
        DeploymentPhase::Running,
        DeploymentPhase::Failed,
        DeploymentPhase::Complete,
    ] {
        assert_eq!(DeploymentPhase::parse(phase.as_str()), Some(phase));
    }
}

#[test]
fn test_cancel_sets_annotations() {
    let config = test_config(1, 1);
    let mut deployment = test_deployment(&config, 1, DeploymentPhase::Running, 1);

    deployment.cancel(CANCELLED_BY_NEWER_REASON);

    assert!(deployment.is_cancelled());
    assert_eq!(
        deployment
            .annotations()
            .get(STATUS_REASON_ANNOTATION)
            .map(String::as_str),
        Some(CANCELLED_BY_NEWER_REASON)
    );
}

#[test]
fn test_latest_deployment_info() {
    let config = test_config(3, 1);
    let deployments = vec![
        test_deployment(&config, 1, DeploymentPhase::Complete, 0),
        test_deployment(&config, 2, DeploymentPhase::Complete, 1),
    ];

    let (deployed, latest) = latest_deployment_info(&config, &deployments);
    assert!(!deployed);
    assert_eq!(latest.and_then(|d| d.version()), Some(2));

    let mut with_latest = deployments.clone();
    with_latest.push(test_deployment(&config, 3, DeploymentPhase::New, 0));
    let (deployed, latest) = latest_deployment_info(&config, &with_latest);
    assert!(deployed);
    assert_eq!(latest.and_then(|d| d.version()), Some(3));

    let (deployed, latest) = latest_deployment_info(&config, &[]);
    assert!(!deployed);
    assert!(latest.is_none());
}

#[test]
fn test_active_deployment_is_newest_complete() {
    let config = test_config(4, 1);
    let deployments = vec![
        test_deployment(&config, 1, DeploymentPhase::Complete, 0),
        test_deployment(&config, 2, DeploymentPhase::Complete, 1),
        test_deployment(&config, 3, DeploymentPhase::Failed, 0),
        test_deployment(&config, 4, DeploymentPhase::Running, 1),
    ];

    let active = active_deployment(&deployments).unwrap();

    assert_eq!(active.version(), Some(2));
    assert!(active_deployment(&deployments[2..]).is_none());
}

#[test]
fn test_sort_by_version() {
    let config = test_config(3, 1);
    let mut deployments = vec![
        test_deployment(&config, 3, DeploymentPhase::Complete, 2),
        test_deployment(&config, 1, DeploymentPhase::Complete, 0),
        test_deployment(&config, 2, DeploymentPhase::Complete, 1),
    ];

    sort_by_version(&mut deployments);

    let versions: Vec<_> = deployments.iter().filter_map(|d| d.version()).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[test]
fn test_names() {
    assert_eq!(deployment_name("frontend", 12), "frontend-12");
    assert_eq!(deployer_pod_name("frontend-12"), "frontend-12-deploy");
}

#[test]
fn test_pod_counts_from_status() {
    let config = test_config(1, 1);
    let deployment = with_pods(test_deployment(&config, 1, DeploymentPhase::Complete, 3), 3, 2);

    assert_eq!(deployment.status_replicas(), 3);
    assert_eq!(deployment.available_replicas(), 2);
    assert_eq!(deployment.ready_replicas(), 2);
    assert_eq!(deployment.images(), vec!["nginx:1.0"]);
}
