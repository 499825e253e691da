//! Dependency resolution
//!
//! A service intent names the provider instances it talks to (a Config
//! instance names its Cassandra, Zookeeper and Rabbitmq, and so on). The
//! aggregator turns each reference into a [`ClusterConfiguration`]: the
//! provider's published member addresses plus its ports and credentials
//! secret. Resolution is read-only.
//!
//! Providers are a closed, typed registry: each provider kind implements
//! [`ClusterConfigurationSource`] and [`Aggregator::resolve`] dispatches on
//! [`ServiceKind`].

mod source;

pub use source::{select_instance, ClusterConfigurationSource};

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::controller::KubeClient;
use crate::crd::ServiceKind;
use crate::Error;

/// A reference from one intent to a provider instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyRef {
    /// Provider kind
    pub kind: ServiceKind,
    /// Instance name (empty = the only instance of the kind in the namespace)
    pub name: String,
    /// Whether a missing provider blocks the pass
    pub required: bool,
}

impl DependencyRef {
    /// A dependency the pass cannot proceed without
    pub fn required(kind: ServiceKind, name: Option<&String>) -> Self {
        Self {
            kind,
            name: name.cloned().unwrap_or_default(),
            required: true,
        }
    }

    /// A dependency that resolves to defaults when absent
    pub fn optional(kind: ServiceKind, name: Option<&String>) -> Self {
        Self {
            kind,
            name: name.cloned().unwrap_or_default(),
            required: false,
        }
    }

    /// Whether this reference points at the provider `kind`/`name`
    ///
    /// An empty reference matches any instance of the kind.
    pub fn matches(&self, kind: ServiceKind, name: &str) -> bool {
        self.kind == kind && (self.name.is_empty() || self.name == name)
    }
}

/// Everything a dependent needs to reach one provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterConfiguration {
    /// Resolved provider instance name (empty when an optional provider is absent)
    pub name: String,
    /// Member addresses, sorted ascending
    pub addresses: Vec<String>,
    /// Primary port
    pub port: u16,
    /// Named auxiliary ports
    pub ports: BTreeMap<String, u16>,
    /// Credentials secret published by the provider
    pub secret: Option<String>,
}

impl ClusterConfiguration {
    /// Whether the provider was resolved to an actual instance
    pub fn is_resolved(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Resolved dependencies of one intent, keyed by provider kind
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dependencies {
    resolved: BTreeMap<ServiceKind, ClusterConfiguration>,
}

impl Dependencies {
    /// Record a resolved provider
    pub fn insert(&mut self, kind: ServiceKind, config: ClusterConfiguration) {
        self.resolved.insert(kind, config);
    }

    /// Resolved configuration of a provider kind
    ///
    /// # Errors
    ///
    /// Returns `Error::Render` if the intent did not declare the dependency;
    /// that is a programming error in a strategy, surfaced rather than hidden.
    pub fn get(&self, kind: ServiceKind) -> Result<&ClusterConfiguration, Error> {
        self.resolved
            .get(&kind)
            .ok_or_else(|| Error::render(format!("dependency {kind} was not resolved")))
    }

    /// Iterate resolved providers in kind order
    pub fn iter(&self) -> impl Iterator<Item = (&ServiceKind, &ClusterConfiguration)> {
        self.resolved.iter()
    }
}

/// Resolves dependency references through the Kubernetes API
pub struct Aggregator<'a> {
    kube: &'a dyn KubeClient,
}

impl<'a> Aggregator<'a> {
    /// Create an aggregator reading through `kube`
    pub fn new(kube: &'a dyn KubeClient) -> Self {
        Self { kube }
    }

    /// Resolve one reference
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` when a required provider does not exist
    /// - `Error::Validation` when the reference names a non-provider kind
    /// - any read failure
    pub async fn resolve(
        &self,
        dependency: &DependencyRef,
        namespace: &str,
    ) -> Result<ClusterConfiguration, Error> {
        let name = dependency.name.as_str();
        let resolved = match dependency.kind {
            ServiceKind::Cassandra => {
                select_instance(self.kube.list_cassandras(namespace).await?, name, namespace)
                    .map(|i| i.cluster_configuration())
            }
            ServiceKind::Zookeeper => {
                select_instance(self.kube.list_zookeepers(namespace).await?, name, namespace)
                    .map(|i| i.cluster_configuration())
            }
            ServiceKind::Rabbitmq => {
                select_instance(self.kube.list_rabbitmqs(namespace).await?, name, namespace)
                    .map(|i| i.cluster_configuration())
            }
            ServiceKind::Config => {
                select_instance(self.kube.list_configs(namespace).await?, name, namespace)
                    .map(|i| i.cluster_configuration())
            }
            other => {
                return Err(Error::validation(format!(
                    "{other} cannot be referenced as a dependency"
                )))
            }
        };

        match resolved {
            Err(Error::NotFound { .. }) if !dependency.required => {
                debug!(kind = %dependency.kind, name, "optional dependency absent, using defaults");
                Ok(default_configuration(dependency.kind))
            }
            other => other,
        }
    }

    /// Resolve every reference, stopping at the first failure
    pub async fn resolve_all(
        &self,
        dependencies: &[DependencyRef],
        namespace: &str,
    ) -> Result<Dependencies, Error> {
        let mut resolved = Dependencies::default();
        for dependency in dependencies {
            let config = self.resolve(dependency, namespace).await?;
            resolved.insert(dependency.kind, config);
        }
        Ok(resolved)
    }
}

/// Empty configuration with the provider kind's default ports
pub fn default_configuration(kind: ServiceKind) -> ClusterConfiguration {
    use crate::crd::{Cassandra, Config, Rabbitmq, Zookeeper};
    match kind {
        ServiceKind::Cassandra => Cassandra::default_cluster_configuration(),
        ServiceKind::Zookeeper => Zookeeper::default_cluster_configuration(),
        ServiceKind::Rabbitmq => Rabbitmq::default_cluster_configuration(),
        ServiceKind::Config => Config::default_cluster_configuration(),
        _ => ClusterConfiguration::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::crd::{Cassandra, CassandraSpec, ServiceStatus, Zookeeper, ZookeeperSpec};

    fn cassandra(name: &str, nodes: &[(&str, &str)]) -> Cassandra {
        let mut c = Cassandra::new(name, CassandraSpec::default());
        c.metadata.namespace = Some("tf".to_string());
        c.status = Some(ServiceStatus {
            nodes: nodes
                .iter()
                .map(|(n, a)| (n.to_string(), a.to_string()))
                .collect(),
            ..Default::default()
        });
        c
    }

    // =========================================================================
    // Story: Empty references default to the sole instance
    // =========================================================================

    #[tokio::test]
    async fn empty_reference_resolves_to_the_only_instance() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_cassandras().returning(|_| {
            Ok(vec![cassandra(
                "cas1",
                &[("cas1-0", "10.0.0.2"), ("cas1-1", "10.0.0.1")],
            )])
        });

        let config = Aggregator::new(&kube)
            .resolve(&DependencyRef::required(ServiceKind::Cassandra, None), "tf")
            .await
            .unwrap();

        assert_eq!(config.name, "cas1");
        assert_eq!(config.addresses, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.port, 9160);
        assert_eq!(config.ports.get("cql"), Some(&9042));
    }

    #[tokio::test]
    async fn empty_reference_with_no_instance_is_not_found() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_zookeepers().returning(|_| Ok(vec![]));

        let result = Aggregator::new(&kube)
            .resolve(&DependencyRef::required(ServiceKind::Zookeeper, None), "tf")
            .await;

        assert!(matches!(result, Err(Error::NotFound { kind, .. }) if kind == "Zookeeper"));
    }

    #[tokio::test]
    async fn empty_reference_with_several_instances_picks_the_smallest_name() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_cassandras().returning(|_| {
            Ok(vec![
                cassandra("cas-b", &[("b-0", "10.0.1.1")]),
                cassandra("cas-a", &[("a-0", "10.0.0.1")]),
            ])
        });

        let config = Aggregator::new(&kube)
            .resolve(&DependencyRef::required(ServiceKind::Cassandra, None), "tf")
            .await
            .unwrap();

        assert_eq!(config.name, "cas-a");
    }

    // =========================================================================
    // Story: Renamed or missing providers
    // =========================================================================

    #[tokio::test]
    async fn named_reference_to_a_missing_instance_is_not_found() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_zookeepers().returning(|_| {
            let mut zk = Zookeeper::new("zk-new", ZookeeperSpec::default());
            zk.metadata.namespace = Some("tf".to_string());
            Ok(vec![zk])
        });

        let zk_name = "zk-old".to_string();
        let result = Aggregator::new(&kube)
            .resolve(
                &DependencyRef::required(ServiceKind::Zookeeper, Some(&zk_name)),
                "tf",
            )
            .await;

        assert!(matches!(result, Err(Error::NotFound { name, .. }) if name == "zk-old"));
    }

    #[tokio::test]
    async fn missing_optional_provider_resolves_to_default_ports() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_configs().returning(|_| Ok(vec![]));

        let config = Aggregator::new(&kube)
            .resolve(&DependencyRef::optional(ServiceKind::Config, None), "tf")
            .await
            .unwrap();

        assert!(!config.is_resolved());
        assert!(config.addresses.is_empty());
        assert_eq!(config.port, 8082);
    }

    #[tokio::test]
    async fn provider_without_members_has_an_empty_address_list() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_cassandras()
            .returning(|_| Ok(vec![cassandra("cas1", &[])]));

        let config = Aggregator::new(&kube)
            .resolve(&DependencyRef::required(ServiceKind::Cassandra, None), "tf")
            .await
            .unwrap();

        assert!(config.addresses.is_empty());
    }

    #[tokio::test]
    async fn non_provider_kinds_cannot_be_referenced() {
        let kube = MockKubeClient::new();
        let result = Aggregator::new(&kube)
            .resolve(&DependencyRef::required(ServiceKind::Webui, None), "tf")
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn resolve_all_stops_at_the_first_missing_provider() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_cassandras()
            .returning(|_| Ok(vec![cassandra("cas1", &[("cas1-0", "10.0.0.1")])]));
        kube.expect_list_zookeepers().returning(|_| Ok(vec![]));
        kube.expect_list_rabbitmqs().never();

        let deps = vec![
            DependencyRef::required(ServiceKind::Cassandra, None),
            DependencyRef::required(ServiceKind::Zookeeper, None),
            DependencyRef::required(ServiceKind::Rabbitmq, None),
        ];
        let result = Aggregator::new(&kube).resolve_all(&deps, "tf").await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[test]
    fn empty_reference_matches_any_instance_of_the_kind() {
        let any = DependencyRef::required(ServiceKind::Config, None);
        let named = DependencyRef::required(ServiceKind::Config, Some(&"cfg1".to_string()));
        assert!(any.matches(ServiceKind::Config, "whatever"));
        assert!(named.matches(ServiceKind::Config, "cfg1"));
        assert!(!named.matches(ServiceKind::Config, "cfg2"));
        assert!(!any.matches(ServiceKind::Cassandra, "cfg1"));
    }
}
