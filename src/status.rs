//! Status and quorum
//!
//! An intent is active once a simple majority of its desired instances is
//! ready. There is no partition or split-brain handling.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::crd::ServiceStatus;
use crate::render::Instance;
use crate::workload::Readiness;

/// Majority quorum: `ready >= replicas / 2 + 1`
///
/// Zero desired replicas still needs one ready instance.
pub fn quorum_active(readiness: Readiness) -> bool {
    readiness.ready >= readiness.replicas / 2 + 1
}

/// Status derived from the current observation
///
/// `nodes` lists every instance regardless of readiness. `config_changed`
/// carries the flag forward unchanged; drift handling sets or clears it
/// separately.
pub fn compute_status(
    instances: &[Instance],
    readiness: Readiness,
    endpoint: Option<String>,
    config_changed: Option<bool>,
) -> ServiceStatus {
    ServiceStatus {
        active: Some(quorum_active(readiness)),
        config_changed,
        nodes: instances
            .iter()
            .map(|i| (i.name.clone(), i.address.clone()))
            .collect(),
        endpoint,
        replicas: Some(readiness.replicas),
        ready_replicas: Some(readiness.ready),
    }
}

/// Whether `desired` differs from what is stored on the intent
pub fn status_needs_update(current: Option<&ServiceStatus>, desired: &ServiceStatus) -> bool {
    current != Some(desired)
}

/// Status write that converges the stored status onto `status`
///
/// A merge patch never drops keys it does not mention, so every field is
/// sent explicitly: `None` becomes `null` and nodes that disappeared since
/// the last write are nulled by name.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusPatch {
    /// Status the intent should carry after the write
    pub status: ServiceStatus,
    /// Node names present in the stored status but not in `status`
    pub removed_nodes: BTreeSet<String>,
}

impl StatusPatch {
    /// Patch that turns `current` into `desired`
    pub fn between(current: Option<&ServiceStatus>, desired: ServiceStatus) -> Self {
        let removed_nodes = current
            .map(|c| {
                c.nodes
                    .keys()
                    .filter(|name| !desired.nodes.contains_key(*name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            status: desired,
            removed_nodes,
        }
    }

    /// JSON merge-patch body for the `status` field
    pub fn to_merge_patch(&self) -> Value {
        let mut nodes: Map<String, Value> = self
            .status
            .nodes
            .iter()
            .map(|(name, address)| (name.clone(), Value::String(address.clone())))
            .collect();
        for name in &self.removed_nodes {
            nodes.insert(name.clone(), Value::Null);
        }
        json!({
            "active": self.status.active,
            "configChanged": self.status.config_changed,
            "nodes": nodes,
            "endpoint": self.status.endpoint,
            "replicas": self.status.replicas,
            "readyReplicas": self.status.ready_replicas,
        })
    }
}
