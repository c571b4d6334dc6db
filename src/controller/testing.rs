//! In-memory test doubles shared by the controller tests
//!
//! `FakeStore` behaves like the API server for the calls the controller makes:
//! resourceVersion checks on updates, UID preconditions on ownership patches,
//! and AlreadyExists on name collisions. Failures can be injected per call.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::controller::clock::MockClock;
use crate::controller::deploymentconfig::deployment::{
    make_deployment, DeploymentPhase, PHASE_ANNOTATION,
};
use crate::controller::deploymentconfig::Context;
use crate::controller::errors::StoreError;
use crate::controller::events::MockEventRecorder;
use crate::controller::store::ObjectStore;
use crate::crd::deployment_config::{
    DeploymentConfig, DeploymentConfigSpec, DeploymentConfigStatus, DeploymentTriggerPolicy,
    TriggerType,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, ReplicationController, ReplicationControllerStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "test";
pub const CONFIG_NAME: &str = "config";
pub const CONFIG_UID: &str = "config-uid";

/// Store calls, in the order they were made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    GetConfig,
    UpdateConfigStatus,
    ListDeployments,
    GetDeployment,
    CreateDeployment,
    UpdateDeployment,
    DeleteDeployment,
    AdoptDeployment,
    ReleaseDeployment,
}

impl Op {
    pub fn is_write(&self) -> bool {
        !matches!(self, Op::GetConfig | Op::ListDeployments | Op::GetDeployment)
    }
}

struct Injected {
    op: Op,
    name: Option<String>,
    error: StoreError,
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    configs: BTreeMap<String, DeploymentConfig>,
    deployments: BTreeMap<String, ReplicationController>,
    hidden: BTreeSet<String>,
    next_rv: u64,
    actions: Vec<(Op, String)>,
    injected: Vec<Injected>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn check(&mut self, op: Op, name: &str) -> Result<(), StoreError> {
        self.actions.push((op, name.to_string()));
        let hit = self.injected.iter_mut().find(|i| {
            i.op == op
                && i.name.as_deref().map(|n| n == name).unwrap_or(true)
                && i.remaining != Some(0)
        });
        match hit {
            Some(injected) => {
                if let Some(n) = injected.remaining.as_mut() {
                    *n -= 1;
                }
                Err(injected.error.clone())
            }
            None => Ok(()),
        }
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_config(&self, mut config: DeploymentConfig) -> DeploymentConfig {
        let mut state = self.state.lock().unwrap();
        config.metadata.resource_version = Some(state.bump());
        let k = key(&config.namespace().unwrap(), &config.name_any());
        state.configs.insert(k, config.clone());
        config
    }

    pub fn add_deployment(&self, mut deployment: ReplicationController) -> ReplicationController {
        let mut state = self.state.lock().unwrap();
        deployment.metadata.resource_version = Some(state.bump());
        if deployment.metadata.uid.is_none() {
            deployment.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        let k = key(&deployment.namespace().unwrap(), &deployment.name_any());
        state.deployments.insert(k, deployment.clone());
        deployment
    }

    /// Keep a deployment out of list results, like a lagging cache
    pub fn hide_from_list(&self, name: &str) {
        self.state.lock().unwrap().hidden.insert(name.to_string());
    }

    /// Fail the next `times` calls of `op` (for `name`, if given)
    pub fn fail(&self, op: Op, name: Option<&str>, error: StoreError, times: u32) {
        self.state.lock().unwrap().injected.push(Injected {
            op,
            name: name.map(str::to_string),
            error,
            remaining: Some(times),
        });
    }

    /// Fail every call of `op` (for `name`, if given)
    pub fn fail_always(&self, op: Op, name: Option<&str>, error: StoreError) {
        self.state.lock().unwrap().injected.push(Injected {
            op,
            name: name.map(str::to_string),
            error,
            remaining: None,
        });
    }

    pub fn config(&self, name: &str) -> DeploymentConfig {
        self.state.lock().unwrap().configs[&key(NAMESPACE, name)].clone()
    }

    pub fn deployment(&self, name: &str) -> Option<ReplicationController> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .values()
            .map(|d| d.name_any())
            .collect()
    }

    pub fn actions(&self) -> Vec<(Op, String)> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.actions().iter().filter(|(o, _)| *o == op).count()
    }

    pub fn writes(&self) -> usize {
        self.actions().iter().filter(|(o, _)| o.is_write()).count()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentConfig, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::GetConfig, name)?;
        state
            .configs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn update_config_status(
        &self,
        config: &DeploymentConfig,
    ) -> Result<DeploymentConfig, StoreError> {
        let mut state = self.state.lock().unwrap();
        let name = config.name_any();
        state.check(Op::UpdateConfigStatus, &name)?;
        let k = key(&config.namespace().unwrap_or_default(), &name);
        let current_rv = match state.configs.get(&k) {
            Some(stored) => stored.resource_version(),
            None => return Err(StoreError::NotFound(name)),
        };
        if config.resource_version().is_some() && config.resource_version() != current_rv {
            return Err(StoreError::Conflict(name));
        }
        let rv = state.bump();
        let stored = state.configs.get_mut(&k).unwrap();
        stored.status = config.status.clone();
        stored.metadata.resource_version = Some(rv);
        Ok(stored.clone())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<ReplicationController>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::ListDeployments, namespace)?;
        Ok(state
            .deployments
            .values()
            .filter(|d| d.namespace().as_deref() == Some(namespace))
            .filter(|d| !state.hidden.contains(&d.name_any()))
            .cloned()
            .collect())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicationController, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::GetDeployment, name)?;
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError> {
        let mut state = self.state.lock().unwrap();
        let name = deployment.name_any();
        state.check(Op::CreateDeployment, &name)?;
        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(StoreError::AlreadyExists(name));
        }
        let mut created = deployment.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some(state.bump());
        state.deployments.insert(k, created.clone());
        Ok(created)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError> {
        let mut state = self.state.lock().unwrap();
        let name = deployment.name_any();
        state.check(Op::UpdateDeployment, &name)?;
        let k = key(namespace, &name);
        let current = state
            .deployments
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        if deployment.resource_version() != current.resource_version() {
            return Err(StoreError::Conflict(name));
        }
        let mut updated = deployment.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.status = current.status.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.deployments.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::DeleteDeployment, name)?;
        state
            .deployments
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn adopt_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner: &OwnerReference,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::AdoptDeployment, name)?;
        let rv = state.bump();
        let stored = state
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if stored.metadata.uid.as_deref() != Some(uid) {
            return Err(StoreError::Conflict(format!("uid precondition failed for {}", name)));
        }
        let refs = stored.metadata.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
        }
        stored.metadata.resource_version = Some(rv);
        Ok(())
    }

    async fn release_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner_uid: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::ReleaseDeployment, name)?;
        let rv = state.bump();
        let stored = state
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if stored.metadata.uid.as_deref() != Some(uid) {
            return Err(StoreError::Invalid(format!("uid mismatch for {}", name)));
        }
        if let Some(refs) = stored.metadata.owner_references.as_mut() {
            refs.retain(|r| r.uid != owner_uid);
            if refs.is_empty() {
                stored.metadata.owner_references = None;
            }
        }
        stored.metadata.resource_version = Some(rv);
        Ok(())
    }
}

pub fn test_template(image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

/// A config with a ConfigChange trigger at the given version
pub fn test_config(latest_version: i64, replicas: i32) -> DeploymentConfig {
    let mut config = DeploymentConfig::new(
        CONFIG_NAME,
        DeploymentConfigSpec {
            replicas,
            selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
            template: test_template("nginx:1.0"),
            triggers: vec![DeploymentTriggerPolicy {
                trigger_type: TriggerType::ConfigChange,
                image_change_params: None,
            }],
            strategy: Default::default(),
            min_ready_seconds: 0,
            paused: false,
            test: false,
            revision_history_limit: None,
        },
    );
    config.metadata.namespace = Some(NAMESPACE.to_string());
    config.metadata.uid = Some(CONFIG_UID.to_string());
    config.metadata.generation = Some(1);
    config.status = Some(DeploymentConfigStatus {
        latest_version,
        ..Default::default()
    });
    config
}

/// A deployment of `config` at `version`, owned by it
pub fn test_deployment(
    config: &DeploymentConfig,
    version: i64,
    phase: DeploymentPhase,
    replicas: i32,
) -> ReplicationController {
    let mut at_version = config.clone();
    at_version.status.get_or_insert_with(Default::default).latest_version = version;
    let mut deployment = make_deployment(&at_version).expect("render deployment");
    deployment
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(PHASE_ANNOTATION.to_string(), phase.as_str().to_string());
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
    deployment
}

/// Give a deployment observed pod counts
pub fn with_pods(
    mut deployment: ReplicationController,
    replicas: i32,
    available: i32,
) -> ReplicationController {
    deployment.status = Some(ReplicationControllerStatus {
        replicas,
        available_replicas: Some(available),
        ready_replicas: Some(available),
        ..Default::default()
    });
    deployment
}

pub fn orphan(mut deployment: ReplicationController) -> ReplicationController {
    deployment.metadata.owner_references = None;
    deployment
}

pub fn fixed_clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ))
}

/// Context over a fake store, with the recorder for assertions
pub fn test_context(store: Arc<FakeStore>) -> (Context, Arc<MockEventRecorder>) {
    let recorder = Arc::new(MockEventRecorder::new());
    let ctx = Context::new(store, recorder.clone(), fixed_clock(), None);
    (ctx, recorder)
}
