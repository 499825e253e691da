//! Per-kind service strategies
//!
//! The reconcile engine is generic. Everything that differs between the
//! service kinds (which providers they depend on, where their credentials
//! come from, what they render, which containers they run and how their
//! workload is rolled) is expressed by one [`ServiceStrategy`]
//! implementation per intent type.
//!
//! Templates are compiled once for the whole process: [`all_templates`]
//! feeds [`TemplateEngine::with_templates`]. Template names are prefixed with
//! the kind (`config/api`) so roles shared by several kinds never collide.

mod analytics_snmp;
mod cassandra;
mod config;
mod kubemanager;
mod rabbitmq;
mod vrouter;
mod webui;
mod zookeeper;

use std::fmt::Debug;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{CommonConfiguration, ServiceKind, ServiceStatus};
use crate::render::{instance_key, ConfigData, CredentialSource, RenderContext};
use crate::template::TemplateEngine;
use crate::workload::{AccessGrant, ContainerSpec, UpdateStrategy, WorkloadKind};
use crate::Error;

/// Behaviour of one service kind
pub trait ServiceStrategy:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Service kind
    const KIND: ServiceKind;

    /// How workload changes are rolled out
    const UPDATE_STRATEGY: UpdateStrategy;

    /// Provider kinds [`dependencies`](Self::dependencies) may reference
    const DEPENDS_ON: &'static [ServiceKind] = &[];

    /// Workload shape
    const WORKLOAD_KIND: WorkloadKind = WorkloadKind::StatefulSet;

    /// Pod-level configuration of the intent
    fn common(&self) -> &CommonConfiguration;

    /// Status as last written by the controller
    fn intent_status(&self) -> Option<&ServiceStatus>;

    /// Providers this intent reads
    fn dependencies(&self) -> Vec<DependencyRef> {
        Vec::new()
    }

    /// Where the credentials used while rendering come from
    fn credential_source(&self, _dependencies: &Dependencies) -> CredentialSource {
        CredentialSource::none()
    }

    /// Secret this intent publishes for itself and its dependents
    ///
    /// Created when absent, never overwritten.
    fn published_secret(&self) -> Option<Secret> {
        None
    }

    /// Render every configuration file
    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error>;

    /// Default containers
    fn containers(&self) -> Vec<ContainerSpec>;

    /// Whether pods run in the host network namespace
    fn host_network(&self) -> bool {
        self.common().host_network()
    }

    /// Named ports of the ClusterIP service fronting the instances (empty = none)
    fn service_ports(&self) -> Vec<(&'static str, u16)> {
        Vec::new()
    }

    /// Kubernetes API access the pods need (None = the namespace default account)
    fn access(&self) -> Option<AccessGrant> {
        None
    }

    /// Reject specs the engine cannot act on
    fn validate(&self) -> Result<(), Error> {
        self.common().validate()
    }
}

/// Every template of every kind
pub fn all_templates() -> impl Iterator<Item = &'static (&'static str, &'static str)> {
    cassandra::TEMPLATES
        .iter()
        .chain(zookeeper::TEMPLATES)
        .chain(rabbitmq::TEMPLATES)
        .chain(config::TEMPLATES)
        .chain(analytics_snmp::TEMPLATES)
        .chain(webui::TEMPLATES)
        .chain(vrouter::TEMPLATES)
        .chain(kubemanager::TEMPLATES)
}

/// Render `(role, template)` pairs once per instance into `<role>.<address>` keys
fn render_per_instance<P: Serialize>(
    data: &mut ConfigData,
    ctx: &RenderContext,
    templates: &TemplateEngine,
    roles: &[(&str, &str)],
    params: &P,
) -> Result<(), Error> {
    for instance in ctx.instances() {
        let value = ctx.for_instance(instance, params);
        for (role, template) in roles {
            let rendered = templates.render(template, value.clone())?;
            data.insert(instance_key(role, &instance.address), rendered);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::aggregator::ClusterConfiguration;
    use crate::render::{instance, Credentials};

    pub fn engine() -> TemplateEngine {
        TemplateEngine::with_templates(all_templates()).expect("templates compile")
    }

    pub fn provider(name: &str, addresses: &[&str], kind: ServiceKind) -> ClusterConfiguration {
        ClusterConfiguration {
            name: name.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            ..crate::aggregator::default_configuration(kind)
        }
    }

    /// Every provider resolved with two members
    pub fn full_dependencies() -> Dependencies {
        let mut deps = Dependencies::default();
        deps.insert(
            ServiceKind::Cassandra,
            provider("cas1", &["10.0.1.1", "10.0.1.2"], ServiceKind::Cassandra),
        );
        deps.insert(
            ServiceKind::Zookeeper,
            provider("zk1", &["10.0.2.1", "10.0.2.2"], ServiceKind::Zookeeper),
        );
        deps.insert(
            ServiceKind::Rabbitmq,
            ClusterConfiguration {
                secret: Some("rmq1-secret".to_string()),
                ..provider("rmq1", &["10.0.3.1", "10.0.3.2"], ServiceKind::Rabbitmq)
            },
        );
        deps.insert(
            ServiceKind::Config,
            provider("cfg1", &["10.0.4.1", "10.0.4.2"], ServiceKind::Config),
        );
        deps
    }

    pub fn credentials(pairs: &[(&'static str, &str)]) -> Credentials {
        Credentials::from_defaults(&CredentialSource::new(None, pairs))
    }

    pub fn context(
        name: &str,
        addresses: &[&str],
        deps: &Dependencies,
        creds: &Credentials,
    ) -> RenderContext {
        let instances = addresses
            .iter()
            .enumerate()
            .map(|(ordinal, address)| instance(&format!("{name}-statefulset-{ordinal}"), address))
            .collect();
        RenderContext::new(name, "tf", instances, deps, creds)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::ServiceStrategy;
    use crate::crd::{
        AnalyticsSnmp, Cassandra, Config, Kubemanager, Rabbitmq, Vrouter, Webui, Zookeeper,
    };
    use crate::render::{instances_from_pods, pod, RenderContext};
    use k8s_openapi::api::core::v1::Pod;
    use std::collections::HashSet;

    #[test]
    fn every_template_compiles_under_strict_mode() {
        let _ = engine();
    }

    fn declares_its_dependency_kinds<K: ServiceStrategy>(intent: &K) {
        for dependency in intent.dependencies() {
            assert!(
                K::DEPENDS_ON.contains(&dependency.kind),
                "{} references undeclared {}",
                K::KIND,
                dependency.kind
            );
        }
    }

    #[test]
    fn dependency_watches_cover_every_reference() {
        declares_its_dependency_kinds(&Cassandra::new("c", Default::default()));
        declares_its_dependency_kinds(&Zookeeper::new("z", Default::default()));
        declares_its_dependency_kinds(&Rabbitmq::new("r", Default::default()));
        declares_its_dependency_kinds(&Config::new("c", Default::default()));
        declares_its_dependency_kinds(&AnalyticsSnmp::new("a", Default::default()));
        declares_its_dependency_kinds(&Webui::new("w", Default::default()));
        declares_its_dependency_kinds(&Vrouter::new("v", Default::default()));
        declares_its_dependency_kinds(&Kubemanager::new("k", Default::default()));
    }

    // =========================================================================
    // Story: The pod listing order never changes the rendered configuration
    // =========================================================================

    fn renders_identically_for_any_pod_order<K: ServiceStrategy>(intent: &K, name: &str) {
        let pods: Vec<Pod> = ["10.0.0.3", "10.0.0.1", "10.0.0.2"]
            .iter()
            .enumerate()
            .map(|(ordinal, ip)| pod(&format!("{name}-statefulset-{ordinal}"), Some(ip)))
            .collect();
        let mut reversed = pods.clone();
        reversed.reverse();
        let deps = full_dependencies();
        let creds = credentials(&[
            ("user", "fabric"),
            ("password", "s3cret"),
            ("vhost", "/"),
            ("keystorePassword", "ks"),
            ("truststorePassword", "ts"),
        ]);
        let templates = engine();
        let render = |pods: &[Pod]| {
            let ctx = RenderContext::new(name, "tf", instances_from_pods(pods), &deps, &creds);
            intent.render(&ctx, &templates).unwrap()
        };

        let forward = render(&pods);
        assert!(!forward.is_empty(), "{} rendered nothing", K::KIND);
        assert_eq!(forward, render(&reversed), "{} depends on pod order", K::KIND);
    }

    #[test]
    fn every_kind_renders_the_same_bytes_for_reversed_pods() {
        renders_identically_for_any_pod_order(&Cassandra::new("cas1", Default::default()), "cas1");
        renders_identically_for_any_pod_order(&Zookeeper::new("zk1", Default::default()), "zk1");
        renders_identically_for_any_pod_order(&Rabbitmq::new("rmq1", Default::default()), "rmq1");
        renders_identically_for_any_pod_order(&Config::new("cfg1", Default::default()), "cfg1");
        renders_identically_for_any_pod_order(
            &AnalyticsSnmp::new("snmp1", Default::default()),
            "snmp1",
        );
        renders_identically_for_any_pod_order(&Webui::new("ui1", Default::default()), "ui1");
        renders_identically_for_any_pod_order(&Vrouter::new("vr1", Default::default()), "vr1");
        renders_identically_for_any_pod_order(&Kubemanager::new("km1", Default::default()), "km1");
    }

    #[test]
    fn template_names_are_unique_across_kinds() {
        let mut seen = HashSet::new();
        for (name, _) in super::all_templates() {
            assert!(seen.insert(*name), "duplicate template {name}");
        }
    }
}
