//! Cassandra Custom Resource Definition
//!
//! The database tier. Other kinds read its published node addresses and ports
//! through the aggregator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for a Cassandra cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Cassandra",
    plural = "cassandras",
    shortname = "cas",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CassandraSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Cassandra-specific configuration
    #[serde(default)]
    pub service_configuration: CassandraConfiguration,
}

/// Cassandra-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConfiguration {
    /// Thrift port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// CQL native transport port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cql_port: Option<u16>,
    /// Local JMX port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmx_local_port: Option<u16>,
    /// Inter-node storage port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_port: Option<u16>,
    /// Inter-node TLS storage port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_storage_port: Option<u16>,
    /// Cassandra cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// JVM minimum heap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_heap_size: Option<String>,
    /// JVM maximum heap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heap_size: Option<String>,
    /// Start the thrift RPC server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_rpc: Option<bool>,
    /// Config instance whose collectors receive node manager reports (empty = the only one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_instance: Option<String>,
    /// Secret holding keystorePassword and truststorePassword
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Cassandra parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CassandraParameters {
    /// Thrift port
    pub port: u16,
    /// CQL port
    pub cql_port: u16,
    /// Local JMX port
    pub jmx_local_port: u16,
    /// Storage port
    pub storage_port: u16,
    /// TLS storage port
    pub ssl_storage_port: u16,
    /// Cluster name
    pub cluster_name: String,
    /// JVM minimum heap
    pub min_heap_size: String,
    /// JVM maximum heap
    pub max_heap_size: String,
    /// Start the thrift RPC server
    pub start_rpc: bool,
}

/// Default thrift port
pub const CASSANDRA_PORT: u16 = 9160;
/// Default CQL port
pub const CASSANDRA_CQL_PORT: u16 = 9042;
/// Default local JMX port
pub const CASSANDRA_JMX_LOCAL_PORT: u16 = 7200;

impl Cassandra {
    /// Resolve every tunable, filling in defaults
    pub fn parameters(&self) -> CassandraParameters {
        let sc = &self.spec.service_configuration;
        CassandraParameters {
            port: sc.port.unwrap_or(CASSANDRA_PORT),
            cql_port: sc.cql_port.unwrap_or(CASSANDRA_CQL_PORT),
            jmx_local_port: sc.jmx_local_port.unwrap_or(CASSANDRA_JMX_LOCAL_PORT),
            storage_port: sc.storage_port.unwrap_or(7000),
            ssl_storage_port: sc.ssl_storage_port.unwrap_or(7001),
            cluster_name: sc
                .cluster_name
                .clone()
                .unwrap_or_else(|| "ContrailConfigDB".to_string()),
            min_heap_size: sc.min_heap_size.clone().unwrap_or_else(|| "100M".to_string()),
            max_heap_size: sc.max_heap_size.clone().unwrap_or_else(|| "1024M".to_string()),
            start_rpc: sc.start_rpc.unwrap_or(true),
        }
    }

    /// Name of the secret holding keystore passwords
    pub fn secret_name(&self) -> String {
        self.spec
            .service_configuration
            .secret
            .clone()
            .unwrap_or_else(|| format!("{}-secret", kube::ResourceExt::name_any(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_default_when_unset() {
        let cassandra = Cassandra::new("cassandra1", CassandraSpec::default());
        let params = cassandra.parameters();
        assert_eq!(params.port, 9160);
        assert_eq!(params.cql_port, 9042);
        assert_eq!(params.jmx_local_port, 7200);
        assert_eq!(params.cluster_name, "ContrailConfigDB");
        assert!(params.start_rpc);
        assert_eq!(cassandra.secret_name(), "cassandra1-secret");
    }

    #[test]
    fn declared_values_win_over_defaults() {
        let mut spec = CassandraSpec::default();
        spec.service_configuration.cql_port = Some(19042);
        spec.service_configuration.max_heap_size = Some("2G".to_string());
        spec.service_configuration.secret = Some("db-passwords".to_string());
        let cassandra = Cassandra::new("cassandra1", spec);
        assert_eq!(cassandra.parameters().cql_port, 19042);
        assert_eq!(cassandra.parameters().max_heap_size, "2G");
        assert_eq!(cassandra.secret_name(), "db-passwords");
    }

    #[test]
    fn spec_parses_from_camel_case_yaml() {
        let yaml = r#"
commonConfiguration:
  replicas: 3
serviceConfiguration:
  cqlPort: 9043
  configInstance: config1
"#;
        let spec: CassandraSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.common_configuration.replicas(), 3);
        assert_eq!(spec.service_configuration.cql_port, Some(9043));
        assert_eq!(
            spec.service_configuration.config_instance.as_deref(),
            Some("config1")
        );
    }
}
