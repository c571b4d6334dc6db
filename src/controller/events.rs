//! Kubernetes Event recording for DeploymentConfigs
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! a reconcile. Tests use `MockEventRecorder` which keeps events in memory.

use crate::crd::deployment_config::DeploymentConfig;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt};
use tracing::warn;

/// Event reasons emitted by the controller
pub mod reasons {
    pub const DEPLOYMENT_CREATED: &str = "DeploymentCreated";
    pub const DEPLOYMENT_CREATION_FAILED: &str = "DeploymentCreationFailed";
    pub const DEPLOYMENT_CANCELLED: &str = "DeploymentCancelled";
    pub const DEPLOYMENT_CANCELLATION_FAILED: &str = "DeploymentCancellationFailed";
    pub const DEPLOYMENT_AWAITING_CANCELLATION: &str = "DeploymentAwaitingCancellation";
    pub const DEPLOYMENT_CLEANUP_FAILED: &str = "DeploymentCleanupFailed";
    pub const SCALED: &str = "ReplicationControllerScaled";
    pub const SCALE_FAILED: &str = "ReplicationControllerScaleFailed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        config: &DeploymentConfig,
        kind: EventKind,
        reason: &str,
        message: String,
    );
}

/// Publishes events through the events.k8s.io API
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: kube::Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        config: &DeploymentConfig,
        kind: EventKind,
        reason: &str,
        message: String,
    ) {
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&event, &config.object_ref(&())).await {
            warn!(
                config = ?config.name_any(),
                reason = reason,
                error = %e,
                "Failed to publish event (non-fatal)"
            );
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

/// Mock recorder for testing - stores events in memory
#[cfg(test)]
#[derive(Default)]
pub struct MockEventRecorder {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl EventRecorder for MockEventRecorder {
    async fn record(
        &self,
        _config: &DeploymentConfig,
        kind: EventKind,
        reason: &str,
        message: String,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind,
            reason: reason.to_string(),
            message,
        });
    }
}
