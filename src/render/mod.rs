//! Configuration rendering inputs and outputs
//!
//! A pass renders every configuration file of an intent from three inputs:
//! the instances discovered from its pods, the resolved dependencies and
//! the credentials. Rendering is pure. The same inputs always produce the
//! same [`ConfigData`], which is what makes drift detection by comparison
//! meaningful.
//!
//! Per-instance files are keyed `<role>.<address>` (see [`instance_key`]);
//! when an instance is replaced its old key disappears and a new one
//! appears, so the replacement is itself a detectable change.

mod credentials;
mod instance;
mod store;

pub use credentials::{CredentialSource, Credentials};
pub use instance::{identity_of, instances_from_pods, Instance};
pub use store::{store_config_map, stored_data, StoreOutcome};

#[cfg(test)]
pub(crate) use instance::pod;

use std::collections::BTreeMap;

use minijinja::{context, Value};
use serde::Serialize;

use crate::aggregator::{ClusterConfiguration, Dependencies};
use crate::kube_utils::deterministic_hash;
use crate::pki::{CA_BUNDLE_MOUNT_PATH, CERTIFICATES_MOUNT_DIR};

/// Rendered configuration: file key to file contents
pub type ConfigData = BTreeMap<String, String>;

/// Key of a per-instance configuration file
pub fn instance_key(role: &str, address: &str) -> String {
    format!("{role}.{address}")
}

/// Content hash of rendered data, stable across processes
pub fn config_hash(data: &ConfigData) -> String {
    let canonical = data.iter().fold(String::new(), |mut acc, (key, value)| {
        acc.push_str(key);
        acc.push('\0');
        acc.push_str(value);
        acc.push('\0');
        acc
    });
    deterministic_hash(&canonical)
}

/// Endpoint lists of one dependency, computed once per pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EndpointLists {
    /// Provider instance name
    pub name: String,
    /// Member addresses
    pub addresses: Vec<String>,
    /// Primary port
    pub port: u16,
    /// Named auxiliary ports
    pub ports: BTreeMap<String, u16>,
    /// `address:port` for the primary port
    pub endpoints: Vec<String>,
    /// `address:port` per named auxiliary port
    pub port_endpoints: BTreeMap<String, Vec<String>>,
}

impl EndpointLists {
    /// Build the lists for one resolved provider
    pub fn from_cluster(config: &ClusterConfiguration) -> Self {
        let join = |port: u16| -> Vec<String> {
            config
                .addresses
                .iter()
                .map(|address| format!("{address}:{port}"))
                .collect()
        };
        Self {
            name: config.name.clone(),
            addresses: config.addresses.clone(),
            port: config.port,
            ports: config.ports.clone(),
            endpoints: join(config.port),
            port_endpoints: config
                .ports
                .iter()
                .map(|(name, port)| (name.clone(), join(*port)))
                .collect(),
        }
    }
}

/// Inputs of one render, shared by every template of the intent
///
/// Templates see `name`, `namespace`, `instances`, `addresses`, `deps`,
/// `creds`, `ca_file` and `cert_dir`. Strategies add `params` and, for
/// per-instance files, `instance`.
#[derive(Clone, Debug)]
pub struct RenderContext {
    instances: Vec<Instance>,
    credentials: Credentials,
    base: Value,
}

impl RenderContext {
    /// Assemble the context; dependency endpoint lists are computed here once
    pub fn new(
        name: &str,
        namespace: &str,
        instances: Vec<Instance>,
        dependencies: &Dependencies,
        credentials: &Credentials,
    ) -> Self {
        let deps: BTreeMap<&str, EndpointLists> = dependencies
            .iter()
            .map(|(kind, config)| (kind.as_str(), EndpointLists::from_cluster(config)))
            .collect();
        let addresses: Vec<&str> = instances.iter().map(|i| i.address.as_str()).collect();

        let base = context! {
            name => name,
            namespace => namespace,
            instances => Value::from_serialize(&instances),
            addresses => addresses,
            deps => Value::from_serialize(&deps),
            creds => Value::from_serialize(credentials),
            ca_file => CA_BUNDLE_MOUNT_PATH,
            cert_dir => CERTIFICATES_MOUNT_DIR,
        };

        Self {
            instances,
            credentials: credentials.clone(),
            base,
        }
    }

    /// Instances sorted by address
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Credentials resolved for this pass
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Context for cluster-wide files
    pub fn cluster<P: Serialize>(&self, params: &P) -> Value {
        context! {
            params => Value::from_serialize(params),
            ..self.base.clone()
        }
    }

    /// Context for the file of one instance
    pub fn for_instance<P: Serialize>(&self, instance: &Instance, params: &P) -> Value {
        context! {
            instance => Value::from_serialize(instance),
            params => Value::from_serialize(params),
            ..self.base.clone()
        }
    }
}

#[cfg(test)]
pub(crate) fn instance(name: &str, address: &str) -> Instance {
    Instance {
        name: name.to_string(),
        address: address.to_string(),
        host_address: Some("192.168.0.1".to_string()),
        identity: identity_of(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ServiceKind;
    use crate::template::TemplateEngine;

    fn data(pairs: &[(&str, &str)]) -> ConfigData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn hash_depends_on_content_not_construction_order() {
        let mut reversed = ConfigData::new();
        reversed.insert("b".to_string(), "2".to_string());
        reversed.insert("a".to_string(), "1".to_string());

        assert_eq!(config_hash(&data(&[("a", "1"), ("b", "2")])), config_hash(&reversed));
        assert_ne!(
            config_hash(&data(&[("a", "1"), ("b", "2")])),
            config_hash(&data(&[("a", "1"), ("b", "3")]))
        );
    }

    #[test]
    fn hash_separates_keys_from_values() {
        assert_ne!(
            config_hash(&data(&[("ab", "c")])),
            config_hash(&data(&[("a", "bc")]))
        );
    }

    #[test]
    fn endpoint_lists_join_every_address_with_each_port() {
        let config = ClusterConfiguration {
            name: "cas1".to_string(),
            addresses: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            port: 9160,
            ports: BTreeMap::from([("cql".to_string(), 9042)]),
            secret: None,
        };
        let lists = EndpointLists::from_cluster(&config);

        assert_eq!(lists.endpoints, vec!["10.0.0.1:9160", "10.0.0.2:9160"]);
        assert_eq!(lists.port_endpoints["cql"], vec!["10.0.0.1:9042", "10.0.0.2:9042"]);
    }

    #[test]
    fn context_exposes_dependencies_by_kind_name() {
        let mut deps = Dependencies::default();
        deps.insert(
            ServiceKind::Zookeeper,
            ClusterConfiguration {
                name: "zk1".to_string(),
                addresses: vec!["10.0.1.1".to_string()],
                port: 2181,
                ..Default::default()
            },
        );
        let ctx = RenderContext::new(
            "cfg1",
            "tf",
            vec![instance("cfg1-config-statefulset-0", "10.0.0.1")],
            &deps,
            &Credentials::default(),
        );

        let engine = TemplateEngine::with_templates(&[(
            "endpoints",
            "{{ deps.zookeeper.endpoints|join(',') }} {{ addresses|join(',') }}",
        )])
        .unwrap();
        let rendered = engine.render("endpoints", ctx.cluster(&())).unwrap();

        assert_eq!(rendered, "10.0.1.1:2181 10.0.0.1");
        assert_eq!(ctx.instances().len(), 1);
    }
}
