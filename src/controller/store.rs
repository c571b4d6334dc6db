//! Object store seam between the reconciler and the API server
//!
//! Production code uses `KubeStore`, a thin wrapper over `kube::Api`.
//! Tests use the in-memory `FakeStore` from `controller::testing`.

use crate::controller::errors::StoreError;
use crate::crd::deployment_config::DeploymentConfig;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ReplicationController;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::debug;

/// Reads and writes the objects the reconciler works with
///
/// Every write is conditional: deployment updates carry the resourceVersion
/// they were read at, status writes carry the config's resourceVersion, and
/// ownership patches assert the child's UID.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_config(&self, namespace: &str, name: &str)
        -> Result<DeploymentConfig, StoreError>;

    /// Write the status subresource of `config`
    async fn update_config_status(
        &self,
        config: &DeploymentConfig,
    ) -> Result<DeploymentConfig, StoreError>;

    /// List every deployment in the namespace, unfiltered
    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<ReplicationController>, StoreError>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicationController, StoreError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError>;

    /// Replace a deployment, failing with a conflict if it changed since read
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError>;

    /// Delete with background propagation
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Add `owner` as controller reference, provided the object still has `uid`
    async fn adopt_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner: &OwnerReference,
    ) -> Result<(), StoreError>;

    /// Drop the owner reference pointing at `owner_uid`, provided the object still has `uid`
    async fn release_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner_uid: &str,
    ) -> Result<(), StoreError>;
}

/// ObjectStore backed by the Kubernetes API
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn configs(&self, namespace: &str) -> Api<DeploymentConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<ReplicationController> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentConfig, StoreError> {
        Ok(self.configs(namespace).get(name).await?)
    }

    async fn update_config_status(
        &self,
        config: &DeploymentConfig,
    ) -> Result<DeploymentConfig, StoreError> {
        let namespace = config
            .namespace()
            .ok_or_else(|| StoreError::Invalid("DeploymentConfig missing namespace".into()))?;
        let name = config.name_any();

        let mut patch = serde_json::json!({ "status": config.status });
        if let Some(rv) = config.resource_version() {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }

        let updated = self
            .configs(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<ReplicationController>, StoreError> {
        let list = self
            .deployments(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicationController, StoreError> {
        Ok(self.deployments(namespace).get(name).await?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError> {
        Ok(self
            .deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &ReplicationController,
    ) -> Result<ReplicationController, StoreError> {
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Invalid("deployment missing name".into()))?;
        Ok(self
            .deployments(namespace)
            .replace(name, &PostParams::default(), deployment)
            .await?)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        debug!(deployment = ?name, namespace = ?namespace, "Deleted deployment");
        Ok(())
    }

    async fn adopt_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner: &OwnerReference,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "metadata": {
                "ownerReferences": [owner],
                "uid": uid,
            }
        });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn release_deployment(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        owner_uid: &str,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "metadata": {
                "ownerReferences": [{ "$patch": "delete", "uid": owner_uid }],
                "uid": uid,
            }
        });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }
}
