//! Kubernetes Event recording
//!
//! Render failures, rollouts and workload creation are surfaced as Events
//! on the intent, visible via `kubectl describe`.
//!
//! Events are fire-and-forget: a failed publish is logged as a warning and
//! never fails the pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events on intents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    ///
    /// * `reason` - machine-readable reason, see [`reasons`]
    /// * `action` - what the controller did, see [`actions`]
    /// * `note` - optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// The rendered configuration changed and the workload was rolled
    pub const CONFIG_CHANGED: &str = "ConfigChanged";
    /// The configuration could not be rendered
    pub const RENDER_FAILED: &str = "RenderFailed";
    /// The workload was created
    pub const WORKLOAD_CREATED: &str = "WorkloadCreated";
    /// Operator-owned workload fields were updated
    pub const WORKLOAD_UPDATED: &str = "WorkloadUpdated";
    /// A required dependency does not exist
    pub const DEPENDENCY_MISSING: &str = "DependencyMissing";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Regular reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Rendering configuration
    pub const RENDER: &str = "Render";
    /// Rolling pods onto new configuration
    pub const ROLLOUT: &str = "Rollout";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::RENDER_FAILED,
                actions::RENDER,
                Some("undefined value".to_string()),
            )
            .await;
    }

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::CONFIG_CHANGED,
            reasons::RENDER_FAILED,
            reasons::WORKLOAD_CREATED,
            reasons::WORKLOAD_UPDATED,
            reasons::DEPENDENCY_MISSING,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' '));
        }
    }
}
