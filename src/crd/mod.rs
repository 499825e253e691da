//! Custom Resource Definitions for the fabric control plane
//!
//! One namespaced intent CRD per service kind. All of them share
//! [`CommonConfiguration`] and [`ServiceStatus`].

mod analytics_snmp;
mod cassandra;
mod config;
mod kind;
mod kubemanager;
mod rabbitmq;
mod types;
mod vrouter;
mod webui;
mod zookeeper;

pub use analytics_snmp::{
    AnalyticsSnmp, AnalyticsSnmpConfiguration, AnalyticsSnmpParameters, AnalyticsSnmpSpec,
};
pub use cassandra::{
    Cassandra, CassandraConfiguration, CassandraParameters, CassandraSpec, CASSANDRA_CQL_PORT,
    CASSANDRA_JMX_LOCAL_PORT, CASSANDRA_PORT,
};
pub use config::{
    AaaMode, Config, ConfigConfiguration, ConfigParameters, ConfigSpec, CONFIG_ANALYTICS_PORT,
    CONFIG_API_PORT, CONFIG_COLLECTOR_PORT,
};
pub use kind::{ServiceKind, LABEL_CONFIG_READY, LABEL_INSTANCE, LABEL_KIND};
pub use kubemanager::{
    Kubemanager, KubemanagerConfiguration, KubemanagerParameters, KubemanagerSpec,
};
pub use rabbitmq::{Rabbitmq, RabbitmqConfiguration, RabbitmqParameters, RabbitmqSpec, RABBITMQ_PORT};
pub use types::{
    AuthMode, AuthParameters, CommonConfiguration, ContainerOverride, KeystoneAuthParameters,
    KeystoneSettings, ServiceStatus, Toleration,
};
pub use vrouter::{Vrouter, VrouterConfiguration, VrouterParameters, VrouterSpec};
pub use webui::{Webui, WebuiConfiguration, WebuiParameters, WebuiSpec};
pub use zookeeper::{
    Zookeeper, ZookeeperConfiguration, ZookeeperParameters, ZookeeperSpec, ZOOKEEPER_CLIENT_PORT,
};

/// API group shared by every intent CRD
pub const API_GROUP: &str = "fabric.dev";
