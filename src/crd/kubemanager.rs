//! Kubemanager Custom Resource Definition
//!
//! The bridge between the Kubernetes API and the fabric: it watches pods,
//! services and namespaces and mirrors them into the config tier. Unlike the
//! other kinds its pods call the Kubernetes API, so they run under a
//! dedicated service account.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::config::DEFAULT_LOG_LEVEL;
use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for the Kubernetes bridge
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Kubemanager",
    plural = "kubemanagers",
    shortname = "km",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubemanagerSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Bridge-specific configuration
    #[serde(default)]
    pub service_configuration: KubemanagerConfiguration,
}

/// Bridge-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubemanagerConfiguration {
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
    /// Service account the pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Cluster role granting the bridge read access to the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<String>,
    /// Binding of the cluster role to the service account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role_binding: Option<String>,
    /// Orchestrator name reported to the config tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_orchestrator: Option<String>,
    /// Kubernetes API server address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_api_server: Option<String>,
    /// Kubernetes API insecure port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_api_port: Option<u16>,
    /// Kubernetes API TLS port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_api_ssl_port: Option<u16>,
    /// Cluster name used to scope fabric objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_cluster_name: Option<String>,
    /// Pod network CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnets: Option<String>,
    /// Service network CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_subnets: Option<String>,
    /// IP fabric CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_fabric_subnets: Option<String>,
    /// Forward pod traffic over the IP fabric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_fabric_forwarding: Option<bool>,
    /// Source-NAT pod traffic leaving over the IP fabric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_fabric_snat: Option<bool>,
    /// Expose host-network services through the fabric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network_service: Option<bool>,
    /// Floating IP pool for public services, as a JSON object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_fip_pool: Option<String>,
    /// Sandesh log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Bridge parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KubemanagerParameters {
    /// Service account the pods run as
    pub service_account: String,
    /// Cluster role name
    pub cluster_role: String,
    /// Cluster role binding name
    pub cluster_role_binding: String,
    /// Orchestrator name
    pub cloud_orchestrator: String,
    /// API server address
    pub kubernetes_api_server: String,
    /// API insecure port
    pub kubernetes_api_port: u16,
    /// API TLS port
    pub kubernetes_api_ssl_port: u16,
    /// Cluster name
    pub kubernetes_cluster_name: String,
    /// Pod network CIDR
    pub pod_subnets: String,
    /// Service network CIDR
    pub service_subnets: String,
    /// IP fabric CIDR
    pub ip_fabric_subnets: String,
    /// IP fabric forwarding
    pub ip_fabric_forwarding: bool,
    /// IP fabric source NAT
    pub ip_fabric_snat: bool,
    /// Host-network services
    pub host_network_service: bool,
    /// Public floating IP pool
    pub public_fip_pool: String,
    /// Sandesh log level
    pub log_level: String,
}

impl Kubemanager {
    /// Resolve every tunable, filling in defaults
    ///
    /// Access object names default to ones derived from the intent, so two
    /// bridges in different namespaces never share a binding.
    pub fn parameters(&self) -> KubemanagerParameters {
        let sc = &self.spec.service_configuration;
        let name = self.metadata.name.as_deref().unwrap_or_default();
        let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
        let text = |value: &Option<String>, default: &str| {
            value.clone().unwrap_or_else(|| default.to_string())
        };
        KubemanagerParameters {
            service_account: sc
                .service_account
                .clone()
                .unwrap_or_else(|| format!("{name}-kubemanager")),
            cluster_role: sc
                .cluster_role
                .clone()
                .unwrap_or_else(|| "fabric-kubemanager".to_string()),
            cluster_role_binding: sc
                .cluster_role_binding
                .clone()
                .unwrap_or_else(|| format!("fabric-kubemanager-{namespace}-{name}")),
            cloud_orchestrator: text(&sc.cloud_orchestrator, "kubernetes"),
            kubernetes_api_server: text(&sc.kubernetes_api_server, "kubernetes.default.svc"),
            kubernetes_api_port: sc.kubernetes_api_port.unwrap_or(8080),
            kubernetes_api_ssl_port: sc.kubernetes_api_ssl_port.unwrap_or(443),
            kubernetes_cluster_name: text(&sc.kubernetes_cluster_name, "kubernetes"),
            pod_subnets: text(&sc.pod_subnets, "10.32.0.0/12"),
            service_subnets: text(&sc.service_subnets, "10.96.0.0/12"),
            ip_fabric_subnets: text(&sc.ip_fabric_subnets, "10.64.0.0/12"),
            ip_fabric_forwarding: sc.ip_fabric_forwarding.unwrap_or(false),
            ip_fabric_snat: sc.ip_fabric_snat.unwrap_or(true),
            host_network_service: sc.host_network_service.unwrap_or(false),
            public_fip_pool: text(&sc.public_fip_pool, "{}"),
            log_level: text(&sc.log_level, DEFAULT_LOG_LEVEL),
        }
    }
}
