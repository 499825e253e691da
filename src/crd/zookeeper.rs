//! Zookeeper Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for a Zookeeper ensemble
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Zookeeper",
    plural = "zookeepers",
    shortname = "zk",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Zookeeper-specific configuration
    #[serde(default)]
    pub service_configuration: ZookeeperConfiguration,
}

/// Zookeeper-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperConfiguration {
    /// Client port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_port: Option<u16>,
    /// Leader election port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_port: Option<u16>,
    /// Quorum (follower) port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
}

/// Zookeeper parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ZookeeperParameters {
    /// Client port
    pub client_port: u16,
    /// Leader election port
    pub election_port: u16,
    /// Quorum port
    pub server_port: u16,
}

/// Default client port
pub const ZOOKEEPER_CLIENT_PORT: u16 = 2181;

impl Zookeeper {
    /// Resolve every port, filling in defaults
    pub fn parameters(&self) -> ZookeeperParameters {
        let sc = &self.spec.service_configuration;
        ZookeeperParameters {
            client_port: sc.client_port.unwrap_or(ZOOKEEPER_CLIENT_PORT),
            election_port: sc.election_port.unwrap_or(3888),
            server_port: sc.server_port.unwrap_or(2888),
        }
    }
}
