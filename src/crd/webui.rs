//! Webui Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for the web console
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Webui",
    plural = "webuis",
    shortname = "ui",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebuiSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Console-specific configuration
    #[serde(default)]
    pub service_configuration: WebuiConfiguration,
}

/// Console-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebuiConfiguration {
    /// Config instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_instance: Option<String>,
    /// Cassandra instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra_instance: Option<String>,
    /// HTTP port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    /// HTTPS port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
}

/// Console parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WebuiParameters {
    /// HTTP port
    pub http_port: u16,
    /// HTTPS port
    pub https_port: u16,
}

impl Webui {
    /// Resolve ports, filling in defaults
    pub fn parameters(&self) -> WebuiParameters {
        let sc = &self.spec.service_configuration;
        WebuiParameters {
            http_port: sc.http_port.unwrap_or(8180),
            https_port: sc.https_port.unwrap_or(8143),
        }
    }
}
