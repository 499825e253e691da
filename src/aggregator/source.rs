//! Provider registry

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::warn;

use super::ClusterConfiguration;
use crate::crd::{Cassandra, Config, Rabbitmq, ServiceKind, ServiceStatus, Zookeeper};
use crate::Error;

/// A provider kind other intents can depend on
pub trait ClusterConfigurationSource: ResourceExt {
    /// Provider kind
    const KIND: ServiceKind;

    /// Connection details published by this instance
    fn cluster_configuration(&self) -> ClusterConfiguration;

    /// Connection details used when an optional provider is absent
    fn default_cluster_configuration() -> ClusterConfiguration;
}

/// Published member addresses, sorted ascending
fn published_addresses(status: Option<&ServiceStatus>) -> Vec<String> {
    let mut addresses: Vec<String> = status
        .map(|s| s.nodes.values().cloned().collect())
        .unwrap_or_default();
    addresses.sort();
    addresses.dedup();
    addresses
}

impl ClusterConfigurationSource for Cassandra {
    const KIND: ServiceKind = ServiceKind::Cassandra;

    fn cluster_configuration(&self) -> ClusterConfiguration {
        let params = self.parameters();
        ClusterConfiguration {
            name: self.name_any(),
            addresses: published_addresses(self.status.as_ref()),
            port: params.port,
            ports: BTreeMap::from([
                ("cql".to_string(), params.cql_port),
                ("jmx".to_string(), params.jmx_local_port),
            ]),
            secret: None,
        }
    }

    fn default_cluster_configuration() -> ClusterConfiguration {
        ClusterConfiguration {
            name: String::new(),
            ..Cassandra::new("", Default::default()).cluster_configuration()
        }
    }
}

impl ClusterConfigurationSource for Zookeeper {
    const KIND: ServiceKind = ServiceKind::Zookeeper;

    fn cluster_configuration(&self) -> ClusterConfiguration {
        let params = self.parameters();
        ClusterConfiguration {
            name: self.name_any(),
            addresses: published_addresses(self.status.as_ref()),
            port: params.client_port,
            ports: BTreeMap::from([
                ("election".to_string(), params.election_port),
                ("server".to_string(), params.server_port),
            ]),
            secret: None,
        }
    }

    fn default_cluster_configuration() -> ClusterConfiguration {
        ClusterConfiguration {
            name: String::new(),
            ..Zookeeper::new("", Default::default()).cluster_configuration()
        }
    }
}

impl ClusterConfigurationSource for Rabbitmq {
    const KIND: ServiceKind = ServiceKind::Rabbitmq;

    fn cluster_configuration(&self) -> ClusterConfiguration {
        let params = self.parameters();
        ClusterConfiguration {
            name: self.name_any(),
            addresses: published_addresses(self.status.as_ref()),
            port: params.port,
            ports: BTreeMap::new(),
            secret: Some(params.secret),
        }
    }

    fn default_cluster_configuration() -> ClusterConfiguration {
        ClusterConfiguration {
            name: String::new(),
            secret: None,
            ..Rabbitmq::new("", Default::default()).cluster_configuration()
        }
    }
}

impl ClusterConfigurationSource for Config {
    const KIND: ServiceKind = ServiceKind::Config;

    fn cluster_configuration(&self) -> ClusterConfiguration {
        let params = self.parameters();
        ClusterConfiguration {
            name: self.name_any(),
            addresses: published_addresses(self.status.as_ref()),
            port: params.api_port,
            ports: BTreeMap::from([
                ("analytics".to_string(), params.analytics_port),
                ("collector".to_string(), params.collector_port),
            ]),
            secret: None,
        }
    }

    fn default_cluster_configuration() -> ClusterConfiguration {
        ClusterConfiguration {
            name: String::new(),
            ..Config::new("", Default::default()).cluster_configuration()
        }
    }
}

/// Pick the referenced instance out of a namespace listing
///
/// An empty reference selects the only instance; with several, the
/// lexicographically smallest name wins and a warning is logged.
pub fn select_instance<K: ClusterConfigurationSource>(
    mut items: Vec<K>,
    reference: &str,
    namespace: &str,
) -> Result<K, Error> {
    if !reference.is_empty() {
        return items
            .into_iter()
            .find(|item| item.name_any() == reference)
            .ok_or_else(|| Error::not_found(K::KIND.kind_name(), reference, namespace));
    }

    items.sort_by_key(|item| item.name_any());
    if items.len() > 1 {
        warn!(
            kind = %K::KIND,
            %namespace,
            candidates = items.len(),
            chosen = %items[0].name_any(),
            "dependency reference is empty but several instances exist"
        );
    }
    items
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(K::KIND.kind_name(), "", namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{RabbitmqConfiguration, RabbitmqSpec};

    #[test]
    fn rabbitmq_publishes_its_credentials_secret() {
        let rmq = Rabbitmq::new(
            "rmq1",
            RabbitmqSpec {
                service_configuration: RabbitmqConfiguration {
                    port: Some(15673),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let config = rmq.cluster_configuration();
        assert_eq!(config.port, 15673);
        assert_eq!(config.secret.as_deref(), Some("rmq1-secret"));
    }

    #[test]
    fn defaults_carry_ports_but_no_identity() {
        let zk = Zookeeper::default_cluster_configuration();
        assert!(zk.name.is_empty());
        assert_eq!(zk.port, 2181);
        assert_eq!(zk.ports["election"], 3888);
        assert!(Rabbitmq::default_cluster_configuration().secret.is_none());
    }

    #[test]
    fn addresses_come_from_published_nodes_sorted() {
        let status = ServiceStatus {
            nodes: BTreeMap::from([
                ("a".to_string(), "10.0.0.9".to_string()),
                ("b".to_string(), "10.0.0.10".to_string()),
            ]),
            ..Default::default()
        };
        assert_eq!(
            published_addresses(Some(&status)),
            vec!["10.0.0.10", "10.0.0.9"]
        );
    }
}
