//! AnalyticsSnmp Custom Resource Definition
//!
//! The topology/analytics tier: SNMP collector plus topology discovery.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::config::DEFAULT_LOG_LEVEL;
use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for the analytics SNMP tier
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "AnalyticsSnmp",
    plural = "analyticssnmps",
    shortname = "snmp",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnmpSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// SNMP-specific configuration
    #[serde(default)]
    pub service_configuration: AnalyticsSnmpConfiguration,
}

/// SNMP-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnmpConfiguration {
    /// Cassandra instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra_instance: Option<String>,
    /// Zookeeper instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper_instance: Option<String>,
    /// Rabbitmq instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq_instance: Option<String>,
    /// Config instance (empty = the only one in the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_instance: Option<String>,
    /// Sandesh log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Collector full scan period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snmp_collector_scan_frequency: Option<u32>,
    /// Collector fast scan period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snmp_collector_fast_scan_frequency: Option<u32>,
    /// Collector introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snmp_collector_introspect_listen_port: Option<u16>,
    /// Topology scan period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_scan_frequency: Option<u32>,
    /// Topology introspect port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_introspect_listen_port: Option<u16>,
}

/// SNMP parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnalyticsSnmpParameters {
    /// Sandesh log level
    pub log_level: String,
    /// Collector full scan period
    pub scan_frequency: u32,
    /// Collector fast scan period
    pub fast_scan_frequency: u32,
    /// Collector introspect port
    pub collector_introspect_port: u16,
    /// Topology scan period
    pub topology_scan_frequency: u32,
    /// Topology introspect port
    pub topology_introspect_port: u16,
}

impl AnalyticsSnmp {
    /// Resolve every tunable, filling in defaults
    pub fn parameters(&self) -> AnalyticsSnmpParameters {
        let sc = &self.spec.service_configuration;
        AnalyticsSnmpParameters {
            log_level: sc
                .log_level
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            scan_frequency: sc.snmp_collector_scan_frequency.unwrap_or(600),
            fast_scan_frequency: sc.snmp_collector_fast_scan_frequency.unwrap_or(60),
            collector_introspect_port: sc.snmp_collector_introspect_listen_port.unwrap_or(5920),
            topology_scan_frequency: sc.topology_scan_frequency.unwrap_or(60),
            topology_introspect_port: sc.topology_introspect_listen_port.unwrap_or(5921),
        }
    }
}
