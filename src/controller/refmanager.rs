//! Controller reference management
//!
//! A controller claims the objects it manages by being their controller owner
//! reference. `RefManager` reconciles a candidate list against a label match:
//! orphans that match are adopted, owned objects that stopped matching are
//! released, and objects controlled by someone else are left alone.

use crate::controller::errors::{AggregateError, StoreError};
use crate::controller::store::ObjectStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ReplicationController;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Ownership patches for one kind of child object
#[async_trait]
pub trait OwnerControl<K>: Send + Sync {
    /// Set `owner` as controller reference, rejected if the object's UID changed
    async fn adopt(&self, obj: &K, owner: &OwnerReference) -> Result<(), StoreError>;

    /// Remove the owner reference with `owner_uid`
    async fn release(&self, obj: &K, owner_uid: &str) -> Result<(), StoreError>;
}

/// Last-moment check that the owner may still take on children
#[async_trait]
pub trait AdoptionCheck: Send + Sync {
    async fn can_adopt(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClaimError {
    #[error("can't adopt {name}: {reason}")]
    CannotAdopt { name: String, reason: String },

    #[error("failed to adopt {name}: {source}")]
    Adopt { name: String, source: StoreError },

    #[error("failed to release {name}: {source}")]
    Release { name: String, source: StoreError },
}

/// Returns the controller owner reference of an object, if any
pub fn controller_ref(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

pub struct RefManager<'a, K> {
    owner: OwnerReference,
    owner_deleting: bool,
    control: &'a dyn OwnerControl<K>,
    adoption: &'a dyn AdoptionCheck,
    can_adopt: OnceCell<Result<(), String>>,
}

impl<'a, K> RefManager<'a, K>
where
    K: Resource + Clone + Send + Sync,
{
    /// `owner` is the controller reference written on adoption
    pub fn new(
        owner: OwnerReference,
        owner_deleting: bool,
        control: &'a dyn OwnerControl<K>,
        adoption: &'a dyn AdoptionCheck,
    ) -> Self {
        Self {
            owner,
            owner_deleting,
            control,
            adoption,
            can_adopt: OnceCell::new(),
        }
    }

    /// Runs the adoption check once, every later call sees the same answer
    async fn can_adopt(&self) -> Result<(), String> {
        self.can_adopt
            .get_or_init(|| self.adoption.can_adopt())
            .await
            .clone()
    }

    /// Claim a single object. Returns whether the object is now owned.
    pub async fn claim_object<F>(&self, obj: &K, matches: &F) -> Result<bool, ClaimError>
    where
        F: Fn(&K) -> bool + Send + Sync,
    {
        match controller_ref(obj.meta()) {
            Some(owner) if owner.uid != self.owner.uid => Ok(false),
            Some(_) => {
                if matches(obj) {
                    return Ok(true);
                }
                // An owner being deleted leaves its children to garbage collection
                if self.owner_deleting {
                    return Ok(false);
                }
                self.release(obj).await?;
                Ok(false)
            }
            None => {
                if self.owner_deleting || !matches(obj) {
                    return Ok(false);
                }
                if obj.meta().deletion_timestamp.is_some() {
                    return Ok(false);
                }
                self.adopt(obj).await
            }
        }
    }

    /// Claim every candidate, returning the owned ones
    ///
    /// Failures are collected rather than short-circuiting so the objects that
    /// were claimed are still returned.
    pub async fn claim<F>(
        &self,
        candidates: Vec<K>,
        matches: F,
    ) -> (Vec<K>, Option<AggregateError<ClaimError>>)
    where
        F: Fn(&K) -> bool + Send + Sync,
    {
        let mut claimed = Vec::new();
        let mut errors = Vec::new();

        for mut obj in candidates {
            let was_owned = controller_ref(obj.meta()).is_some();
            match self.claim_object(&obj, &matches).await {
                Ok(true) => {
                    if !was_owned {
                        obj.meta_mut()
                            .owner_references
                            .get_or_insert_with(Vec::new)
                            .push(self.owner.clone());
                    }
                    claimed.push(obj);
                }
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        (claimed, AggregateError::from_errors(errors))
    }

    async fn adopt(&self, obj: &K) -> Result<bool, ClaimError> {
        let name = obj.name_any();
        self.can_adopt()
            .await
            .map_err(|reason| ClaimError::CannotAdopt {
                name: name.clone(),
                reason,
            })?;

        match self.control.adopt(obj, &self.owner).await {
            Ok(()) => {
                info!(object = ?name, owner = ?self.owner.name, "Adopted orphan");
                Ok(true)
            }
            // Gone before we got to it
            Err(e) if e.is_not_found() => Ok(false),
            Err(source) => Err(ClaimError::Adopt { name, source }),
        }
    }

    async fn release(&self, obj: &K) -> Result<(), ClaimError> {
        let name = obj.name_any();
        match self.control.release(obj, &self.owner.uid).await {
            Ok(()) => {
                info!(object = ?name, owner = ?self.owner.name, "Released object no longer matching");
                Ok(())
            }
            // Deleted, or deleted and recreated under a new UID
            Err(e) if e.is_not_found() || e.is_invalid() => {
                debug!(object = ?name, error = %e, "Release target already gone");
                Ok(())
            }
            Err(source) => Err(ClaimError::Release { name, source }),
        }
    }
}

/// Ownership patches for deployments in one namespace
pub struct DeploymentControl<'a> {
    store: &'a dyn ObjectStore,
    namespace: &'a str,
}

impl<'a> DeploymentControl<'a> {
    pub fn new(store: &'a dyn ObjectStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }
}

fn uid_of(obj: &ReplicationController) -> Result<String, StoreError> {
    obj.uid()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no uid", obj.name_any())))
}

#[async_trait]
impl OwnerControl<ReplicationController> for DeploymentControl<'_> {
    async fn adopt(
        &self,
        obj: &ReplicationController,
        owner: &OwnerReference,
    ) -> Result<(), StoreError> {
        let uid = uid_of(obj)?;
        self.store
            .adopt_deployment(self.namespace, &obj.name_any(), &uid, owner)
            .await
    }

    async fn release(&self, obj: &ReplicationController, owner_uid: &str) -> Result<(), StoreError> {
        let uid = uid_of(obj)?;
        self.store
            .release_deployment(self.namespace, &obj.name_any(), &uid, owner_uid)
            .await
    }
}

/// Re-reads the owning config so nothing is adopted by a config that was
/// deleted (or deleted and recreated) since the deployments were listed
pub struct ConfigAdoptionCheck<'a> {
    store: &'a dyn ObjectStore,
    namespace: &'a str,
    name: &'a str,
    uid: &'a str,
}

impl<'a> ConfigAdoptionCheck<'a> {
    pub fn new(store: &'a dyn ObjectStore, namespace: &'a str, name: &'a str, uid: &'a str) -> Self {
        Self {
            store,
            namespace,
            name,
            uid,
        }
    }
}

#[async_trait]
impl AdoptionCheck for ConfigAdoptionCheck<'_> {
    async fn can_adopt(&self) -> Result<(), String> {
        let fresh = self
            .store
            .get_config(self.namespace, self.name)
            .await
            .map_err(|e| e.to_string())?;

        let fresh_uid = fresh.uid().unwrap_or_default();
        if fresh_uid != self.uid {
            return Err(format!(
                "original DeploymentConfig {}/{} is gone: got uid {}, wanted {}",
                self.namespace, self.name, fresh_uid, self.uid
            ));
        }
        if fresh.meta().deletion_timestamp.is_some() {
            return Err(format!(
                "DeploymentConfig {}/{} has just been deleted",
                self.namespace, self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "refmanager_test.rs"]
mod tests;
