//! Derived workloads
//!
//! Every intent owns exactly one workload: a StatefulSet for the replicated
//! tiers and a DaemonSet for the per-node agent. This module defines the
//! closed set of workload shapes, how desired workloads are compiled, which
//! fields the operator owns on them, and the create-or-update lifecycle.
//!
//! For workload generation, use [`WorkloadCompiler`]. For idempotent
//! create-or-update, use [`ensure_workload`].

mod access;
mod compiler;
mod lifecycle;
mod owned;

pub use access::{ensure_access, rule, AccessGrant, AccessObjects};
pub use compiler::{
    ContainerSpec, ImageSettings, WorkloadCompiler, WorkloadInput, CONFIG_MOUNT_DIR,
};
pub use lifecycle::{ensure_service, ensure_workload, rollout_annotations};
pub use owned::OwnedFields;

use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::ServiceKind;

/// Pod-template annotation holding the hash of the configuration the pods run with
pub const CONFIG_HASH_ANNOTATION: &str = "fabric.dev/config-hash";

/// Pod-template annotation bumped on every configuration-driven rollout
pub const RESTARTED_AT_ANNOTATION: &str = "fabric.dev/restarted-at";

/// Workload shape owned by a service kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Ordered, replicated instances
    StatefulSet,
    /// One instance per selected node
    DaemonSet,
}

impl WorkloadKind {
    /// Name of the workload owned by `instance` of `kind`
    pub fn workload_name(&self, kind: ServiceKind, instance: &str) -> String {
        let suffix = match self {
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
        };
        format!("{instance}-{}-{suffix}", kind.as_str())
    }
}

/// How changes to owned fields are rolled out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Replace the workload in place and let the controller roll pods
    Rolling,
    /// Delete the workload; it is recreated from the desired object on the next pass
    DeleteFirst,
}

/// Result of one create-or-update step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadOutcome {
    /// The workload did not exist and was created
    Created,
    /// Owned fields already match
    Unchanged,
    /// The workload was replaced or deleted for recreation
    Updated,
    /// A previous deletion is still in progress
    Terminating,
}

impl WorkloadOutcome {
    /// Whether the pass should stop and requeue shortly
    pub fn requires_requeue(&self) -> bool {
        matches!(self, Self::Updated | Self::Terminating)
    }
}

/// Desired/ready counts used for quorum
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Desired instances
    pub replicas: i32,
    /// Ready instances
    pub ready: i32,
}

/// The closed set of workload objects the operator manages
#[derive(Clone, Debug, PartialEq)]
pub enum Workload {
    /// Replicated tiers
    StatefulSet(StatefulSet),
    /// Per-node agent
    DaemonSet(DaemonSet),
}

impl Workload {
    /// Shape of this workload
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::StatefulSet(sts) => &sts.metadata,
            Self::DaemonSet(ds) => &ds.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> String {
        match self {
            Self::StatefulSet(sts) => sts.name_any(),
            Self::DaemonSet(ds) => ds.name_any(),
        }
    }

    /// Whether a deletion is in progress
    pub fn is_terminating(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    /// Declared replicas (StatefulSet only)
    pub fn replicas(&self) -> Option<i32> {
        match self {
            Self::StatefulSet(sts) => Some(
                sts.spec
                    .as_ref()
                    .and_then(|s| s.replicas)
                    .unwrap_or(1),
            ),
            Self::DaemonSet(_) => None,
        }
    }

    /// Pod template
    pub fn pod_template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Self::StatefulSet(sts) => sts.spec.as_ref().map(|s| &s.template),
            Self::DaemonSet(ds) => ds.spec.as_ref().map(|s| &s.template),
        }
    }

    /// Mutable pod template
    pub fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Self::StatefulSet(sts) => sts.spec.as_mut().map(|s| &mut s.template),
            Self::DaemonSet(ds) => ds.spec.as_mut().map(|s| &mut s.template),
        }
    }

    /// Value of a pod-template annotation
    pub fn template_annotation(&self, key: &str) -> Option<&str> {
        self.pod_template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Hash of the configuration the pods were last rolled with
    pub fn applied_config_hash(&self) -> Option<&str> {
        self.template_annotation(CONFIG_HASH_ANNOTATION)
    }

    /// Desired and ready instance counts
    ///
    /// For a DaemonSet the desired count is the number of nodes it is
    /// scheduled on.
    pub fn readiness(&self) -> Readiness {
        match self {
            Self::StatefulSet(sts) => Readiness {
                replicas: self.replicas().unwrap_or(1),
                ready: sts
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0),
            },
            Self::DaemonSet(ds) => {
                let status = ds.status.as_ref();
                Readiness {
                    replicas: status.map(|s| s.desired_number_scheduled).unwrap_or(0),
                    ready: status.map(|s| s.number_ready).unwrap_or(0),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DaemonSetStatus, StatefulSetSpec, StatefulSetStatus};
    use std::collections::BTreeMap;

    fn statefulset(replicas: Option<i32>, ready: Option<i32>) -> Workload {
        Workload::StatefulSet(StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations: Some(BTreeMap::from([(
                            CONFIG_HASH_ANNOTATION.to_string(),
                            "abc".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn names_follow_instance_kind_shape_convention() {
        assert_eq!(
            WorkloadKind::StatefulSet.workload_name(ServiceKind::Cassandra, "cas1"),
            "cas1-cassandra-statefulset"
        );
        assert_eq!(
            WorkloadKind::DaemonSet.workload_name(ServiceKind::Vrouter, "vr1"),
            "vr1-vrouter-daemonset"
        );
    }

    #[test]
    fn statefulset_readiness_defaults_to_one_replica_none_ready() {
        let workload = statefulset(None, None);
        assert_eq!(
            workload.readiness(),
            Readiness {
                replicas: 1,
                ready: 0
            }
        );
        assert_eq!(workload.applied_config_hash(), Some("abc"));
    }

    #[test]
    fn daemonset_readiness_uses_scheduled_counts() {
        let workload = Workload::DaemonSet(DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: 4,
                number_ready: 3,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            workload.readiness(),
            Readiness {
                replicas: 4,
                ready: 3
            }
        );
        assert_eq!(workload.replicas(), None);
    }

    #[test]
    fn only_updates_and_terminations_requeue() {
        assert!(WorkloadOutcome::Updated.requires_requeue());
        assert!(WorkloadOutcome::Terminating.requires_requeue());
        assert!(!WorkloadOutcome::Created.requires_requeue());
        assert!(!WorkloadOutcome::Unchanged.requires_requeue());
    }
}
