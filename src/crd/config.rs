//! Config Custom Resource Definition
//!
//! The API/config tier. It consumes the database, coordination and broker
//! tiers and is itself consumed by analytics, web console and node agents.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AuthMode, CommonConfiguration, ServiceStatus};

/// Specification for a Config tier
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Config",
    plural = "configs",
    shortname = "cfg",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Config-specific configuration
    #[serde(default)]
    pub service_configuration: ConfigConfiguration,
}

/// AAA mode of the API server
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AaaMode {
    /// No access control
    #[serde(rename = "noauth")]
    Noauth,
    /// Role based access control
    #[serde(rename = "rbac")]
    Rbac,
    /// Every authenticated user is cloud admin
    #[serde(rename = "cloud-admin")]
    CloudAdmin,
}

impl std::fmt::Display for AaaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noauth => write!(f, "no-auth"),
            Self::Rbac => write!(f, "rbac"),
            Self::CloudAdmin => write!(f, "cloud-admin"),
        }
    }
}

/// Config-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigConfiguration {
    /// API server port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_port: Option<u16>,
    /// Analytics API port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_port: Option<u16>,
    /// Collector port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_port: Option<u16>,
    /// API introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_introspect_port: Option<u16>,
    /// Schema transformer introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_introspect_port: Option<u16>,
    /// Device manager introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_manager_introspect_port: Option<u16>,
    /// Service monitor introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svc_monitor_introspect_port: Option<u16>,
    /// Analytics API introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_introspect_port: Option<u16>,
    /// Collector introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_introspect_port: Option<u16>,
    /// Cassandra instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra_instance: Option<String>,
    /// Zookeeper instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper_instance: Option<String>,
    /// Rabbitmq instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq_instance: Option<String>,
    /// Sandesh log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// AAA mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaa_mode: Option<AaaMode>,
    /// Analytics data TTL in hours
    #[serde(rename = "analyticsDataTTL", default, skip_serializing_if = "Option::is_none")]
    pub analytics_data_ttl: Option<u32>,
    /// Config audit TTL in hours
    #[serde(
        rename = "analyticsConfigAuditTTL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub analytics_config_audit_ttl: Option<u32>,
    /// Statistics TTL in hours
    #[serde(
        rename = "analyticsStatisticsTTL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub analytics_statistics_ttl: Option<u32>,
    /// Flow TTL in hours
    #[serde(rename = "analyticsFlowTTL", default, skip_serializing_if = "Option::is_none")]
    pub analytics_flow_ttl: Option<u32>,
}

/// Config parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ConfigParameters {
    /// API server port
    pub api_port: u16,
    /// Analytics API port
    pub analytics_port: u16,
    /// Collector port
    pub collector_port: u16,
    /// API introspect port
    pub api_introspect_port: u16,
    /// Schema transformer introspect port
    pub schema_introspect_port: u16,
    /// Device manager introspect port
    pub device_manager_introspect_port: u16,
    /// Service monitor introspect port
    pub svc_monitor_introspect_port: u16,
    /// Analytics API introspect port
    pub analytics_introspect_port: u16,
    /// Collector introspect port
    pub collector_introspect_port: u16,
    /// Sandesh log level
    pub log_level: String,
    /// AAA mode as rendered into the API server configuration
    pub aaa_mode: String,
    /// Analytics data TTL
    pub analytics_data_ttl: u32,
    /// Config audit TTL
    pub analytics_config_audit_ttl: u32,
    /// Statistics TTL
    pub analytics_statistics_ttl: u32,
    /// Flow TTL
    pub analytics_flow_ttl: u32,
}

/// Default API server port
pub const CONFIG_API_PORT: u16 = 8082;
/// Default analytics API port
pub const CONFIG_ANALYTICS_PORT: u16 = 8081;
/// Default collector port
pub const CONFIG_COLLECTOR_PORT: u16 = 8086;
/// Default sandesh log level
pub const DEFAULT_LOG_LEVEL: &str = "SYS_NOTICE";

impl Config {
    /// Resolve every tunable, filling in defaults
    ///
    /// The AAA mode defaults to `rbac` when keystone authentication is
    /// configured and to `noauth` otherwise.
    pub fn parameters(&self) -> ConfigParameters {
        let sc = &self.spec.service_configuration;
        let aaa_mode = sc.aaa_mode.clone().unwrap_or_else(|| {
            match self.spec.common_configuration.auth_mode() {
                AuthMode::Keystone => AaaMode::Rbac,
                AuthMode::Noauth => AaaMode::Noauth,
            }
        });
        ConfigParameters {
            api_port: sc.api_port.unwrap_or(CONFIG_API_PORT),
            analytics_port: sc.analytics_port.unwrap_or(CONFIG_ANALYTICS_PORT),
            collector_port: sc.collector_port.unwrap_or(CONFIG_COLLECTOR_PORT),
            api_introspect_port: sc.api_introspect_port.unwrap_or(8084),
            schema_introspect_port: sc.schema_introspect_port.unwrap_or(8087),
            device_manager_introspect_port: sc.device_manager_introspect_port.unwrap_or(8096),
            svc_monitor_introspect_port: sc.svc_monitor_introspect_port.unwrap_or(8088),
            analytics_introspect_port: sc.analytics_introspect_port.unwrap_or(8090),
            collector_introspect_port: sc.collector_introspect_port.unwrap_or(8089),
            log_level: sc
                .log_level
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            aaa_mode: aaa_mode.to_string(),
            analytics_data_ttl: sc.analytics_data_ttl.unwrap_or(48),
            analytics_config_audit_ttl: sc.analytics_config_audit_ttl.unwrap_or(2160),
            analytics_statistics_ttl: sc.analytics_statistics_ttl.unwrap_or(168),
            analytics_flow_ttl: sc.analytics_flow_ttl.unwrap_or(2),
        }
    }
}
