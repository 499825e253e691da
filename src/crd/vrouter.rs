//! Vrouter Custom Resource Definition
//!
//! The per-node data-plane agent. Unlike the other kinds it runs as a
//! DaemonSet, one instance per selected node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::config::DEFAULT_LOG_LEVEL;
use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for the node agent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Vrouter",
    plural = "vrouters",
    shortname = "vr",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VrouterSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Agent-specific configuration
    #[serde(default)]
    pub service_configuration: VrouterConfiguration,
}

/// Agent-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VrouterConfiguration {
    /// Config instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_instance: Option<String>,
    /// Rabbitmq instance used for the DNS/XMPP bus (empty = the only one, if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq_instance: Option<String>,
    /// Physical interface bound to the vhost interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_interface: Option<String>,
    /// Default gateway of the fabric network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Metadata proxy shared secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_secret: Option<String>,
    /// Sandesh log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Agent parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VrouterParameters {
    /// Physical interface
    pub physical_interface: String,
    /// Fabric gateway (empty = discovered by the agent)
    pub gateway: String,
    /// Metadata proxy secret
    pub metadata_secret: String,
    /// Sandesh log level
    pub log_level: String,
}

impl Vrouter {
    /// Resolve every tunable, filling in defaults
    pub fn parameters(&self) -> VrouterParameters {
        let sc = &self.spec.service_configuration;
        VrouterParameters {
            physical_interface: sc
                .physical_interface
                .clone()
                .unwrap_or_else(|| "eth0".to_string()),
            gateway: sc.gateway.clone().unwrap_or_default(),
            metadata_secret: sc
                .metadata_secret
                .clone()
                .unwrap_or_else(|| "contrail".to_string()),
            log_level: sc
                .log_level
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}
