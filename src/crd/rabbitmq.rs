//! Rabbitmq Custom Resource Definition
//!
//! The message broker. Its credentials live in a Secret that dependents read
//! once per reconcile.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CommonConfiguration, ServiceStatus};

/// Specification for a Rabbitmq cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Rabbitmq",
    plural = "rabbitmqs",
    shortname = "rmq",
    status = "ServiceStatus",
    namespaced,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqSpec {
    /// Pod-level configuration
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Rabbitmq-specific configuration
    #[serde(default)]
    pub service_configuration: RabbitmqConfiguration,
}

/// Rabbitmq-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqConfiguration {
    /// AMQP TLS port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Erlang distribution cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erlang_cookie: Option<String>,
    /// Virtual host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    /// Default user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Default password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Secret holding user, password and vhost for clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// exactly, all or nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrored_queue_mode: Option<String>,
    /// Partition handling strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_partition_handling: Option<String>,
}

/// Rabbitmq parameters with defaults applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RabbitmqParameters {
    /// AMQP TLS port
    pub port: u16,
    /// Erlang distribution cookie
    pub erlang_cookie: String,
    /// Virtual host
    pub vhost: String,
    /// Default user
    pub user: String,
    /// Default password
    pub password: String,
    /// Secret name clients read credentials from
    pub secret: String,
    /// Mirrored queue mode
    pub mirrored_queue_mode: String,
    /// Partition handling strategy
    pub cluster_partition_handling: String,
}

/// Default AMQP TLS port
pub const RABBITMQ_PORT: u16 = 5673;

impl Rabbitmq {
    /// Resolve every tunable, filling in defaults
    pub fn parameters(&self) -> RabbitmqParameters {
        let sc = &self.spec.service_configuration;
        RabbitmqParameters {
            port: sc.port.unwrap_or(RABBITMQ_PORT),
            erlang_cookie: sc
                .erlang_cookie
                .clone()
                .unwrap_or_else(|| "47EFF3BB-4786-46E0-A5BB-58455B3C2CB4".to_string()),
            vhost: sc.vhost.clone().unwrap_or_else(|| "/".to_string()),
            user: sc.user.clone().unwrap_or_else(|| "guest".to_string()),
            password: sc.password.clone().unwrap_or_else(|| "guest".to_string()),
            secret: self.secret_name(),
            mirrored_queue_mode: sc
                .mirrored_queue_mode
                .clone()
                .unwrap_or_else(|| "all".to_string()),
            cluster_partition_handling: sc
                .cluster_partition_handling
                .clone()
                .unwrap_or_else(|| "autoheal".to_string()),
        }
    }

    /// Name of the credentials secret
    pub fn secret_name(&self) -> String {
        self.spec
            .service_configuration
            .secret
            .clone()
            .unwrap_or_else(|| format!("{}-secret", self.name_any()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_default_when_unset() {
        let rabbit = Rabbitmq::new("rabbitmq1", RabbitmqSpec::default());
        let params = rabbit.parameters();
        assert_eq!(params.port, 5673);
        assert_eq!(params.vhost, "/");
        assert_eq!(params.user, "guest");
        assert_eq!(params.secret, "rabbitmq1-secret");
        assert_eq!(params.mirrored_queue_mode, "all");
        assert_eq!(params.cluster_partition_handling, "autoheal");
    }

    #[test]
    fn explicit_secret_name_is_used() {
        let mut spec = RabbitmqSpec::default();
        spec.service_configuration.secret = Some("broker-creds".to_string());
        let rabbit = Rabbitmq::new("rabbitmq1", spec);
        assert_eq!(rabbit.secret_name(), "broker-creds");
    }
}
