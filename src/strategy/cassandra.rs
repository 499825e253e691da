//! Database tier

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{ServiceStrategy, TemplateEngine};
use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{Cassandra, CommonConfiguration, ServiceKind, ServiceStatus};
use crate::kube_utils::instance_labels;
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

const KEYSTORE_PASSWORD: &str = "keystorePassword";
const TRUSTSTORE_PASSWORD: &str = "truststorePassword";

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("cassandra/cassandra.yaml", CASSANDRA_YAML),
    ("cassandra/nodemanager", NODEMANAGER),
    ("cassandra/keystore-init.sh", KEYSTORE_INIT),
];

const CASSANDRA_YAML: &str = r#"cluster_name: {{ params.cluster_name }}
num_tokens: 256
hinted_handoff_enabled: true
max_hint_window_in_ms: 10800000
authenticator: AllowAllAuthenticator
authorizer: AllowAllAuthorizer
partitioner: org.apache.cassandra.dht.Murmur3Partitioner
data_file_directories:
- /var/lib/cassandra/data
commitlog_directory: /var/lib/cassandra/commitlog
saved_caches_directory: /var/lib/cassandra/saved_caches
commitlog_sync: periodic
commitlog_sync_period_in_ms: 10000
seed_provider:
- class_name: org.apache.cassandra.locator.SimpleSeedProvider
  parameters:
  - seeds: "{{ addresses|join(',') }}"
concurrent_reads: 32
concurrent_writes: 32
storage_port: {{ params.storage_port }}
ssl_storage_port: {{ params.ssl_storage_port }}
listen_address: {{ instance.address }}
broadcast_address: {{ instance.address }}
start_native_transport: true
native_transport_port: {{ params.cql_port }}
start_rpc: {{ params.start_rpc }}
rpc_address: {{ instance.address }}
rpc_port: {{ params.port }}
broadcast_rpc_address: {{ instance.address }}
endpoint_snitch: SimpleSnitch
server_encryption_options:
  internode_encryption: all
  keystore: /etc/keystore/server-keystore.jks
  keystore_password: {{ creds.keystorePassword|required }}
  truststore: /etc/keystore/server-truststore.jks
  truststore_password: {{ creds.truststorePassword|required }}
  require_client_auth: true
  store_type: JKS
client_encryption_options:
  enabled: true
  optional: false
  keystore: /etc/keystore/server-keystore.jks
  keystore_password: {{ creds.keystorePassword }}
auto_bootstrap: true
"#;

const NODEMANAGER: &str = r#"[DEFAULTS]
http_server_ip={{ instance.address }}
log_file=/var/log/contrail/cassandra-nodemgr.log
log_level=SYS_NOTICE
log_local=1
hostname={{ instance.name }}
hostip={{ instance.address }}
db_port={{ params.cql_port }}
db_jmx_port={{ params.jmx_local_port }}
db_use_ssl=True

[COLLECTOR]
server_list={{ deps.config.port_endpoints.collector|join(' ') }}

[SANDESH]
introspect_ssl_enable=True
sandesh_ssl_enable=True
sandesh_keyfile={{ cert_dir }}/server-key-{{ instance.address }}.pem
sandesh_certfile={{ cert_dir }}/server-{{ instance.address }}.crt
sandesh_ca_cert={{ ca_file }}
"#;

const KEYSTORE_INIT: &str = r#"#!/bin/bash
set -e
rm -f /etc/keystore/server-truststore.jks /etc/keystore/server-keystore.jks
mkdir -p /etc/keystore
keytool -keystore /etc/keystore/server-truststore.jks -keypass {{ creds.keystorePassword }} -storepass {{ creds.truststorePassword }} -noprompt -alias CARoot -import -file {{ ca_file }}
openssl pkcs12 -export -in {{ cert_dir }}/server-${POD_IP}.crt -inkey {{ cert_dir }}/server-key-${POD_IP}.pem -chain -CAfile {{ ca_file }} -password pass:{{ creds.truststorePassword }} -name ${POD_NAME} -out TmpFile
keytool -importkeystore -deststorepass {{ creds.keystorePassword }} -destkeypass {{ creds.keystorePassword }} -destkeystore /etc/keystore/server-keystore.jks -deststoretype pkcs12 -srcstorepass {{ creds.truststorePassword }} -srckeystore TmpFile -srcstoretype PKCS12 -alias ${POD_NAME}
"#;

fn generated_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

impl ServiceStrategy for Cassandra {
    const KIND: ServiceKind = ServiceKind::Cassandra;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::DeleteFirst;
    const DEPENDS_ON: &'static [ServiceKind] = &[ServiceKind::Config];

    fn common(&self) -> &CommonConfiguration {
        &self.spec.common_configuration
    }

    fn intent_status(&self) -> Option<&ServiceStatus> {
        self.status.as_ref()
    }

    fn dependencies(&self) -> Vec<DependencyRef> {
        vec![DependencyRef::optional(
            ServiceKind::Config,
            self.spec.service_configuration.config_instance.as_ref(),
        )]
    }

    fn credential_source(&self, _dependencies: &Dependencies) -> CredentialSource {
        CredentialSource::new(
            Some(self.secret_name()),
            &[(KEYSTORE_PASSWORD, "contrail123"), (TRUSTSTORE_PASSWORD, "contrail123")],
        )
    }

    fn published_secret(&self) -> Option<Secret> {
        Some(Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                labels: Some(instance_labels(Self::KIND, &self.name_any())),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([
                (KEYSTORE_PASSWORD.to_string(), generated_password()),
                (TRUSTSTORE_PASSWORD.to_string(), generated_password()),
            ])),
            ..Default::default()
        })
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let params = self.parameters();
        let mut data = ConfigData::new();
        for instance in ctx.instances() {
            let value = ctx.for_instance(instance, &params);
            data.insert(
                format!("cassandra.{}.yaml", instance.address),
                templates.render("cassandra/cassandra.yaml", value.clone())?,
            );
            data.insert(
                format!("nodemanager.{}", instance.address),
                templates.render("cassandra/nodemanager", value)?,
            );
        }
        data.insert(
            "keystore-init.sh".to_string(),
            templates.render("cassandra/keystore-init.sh", ctx.cluster(&params))?,
        );
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        vec![
            ContainerSpec::new(
                "cassandra",
                "contrail-external-cassandra",
                &[
                    "bash",
                    "-c",
                    "bash /etc/contrailconfigmaps/keystore-init.sh && exec cassandra -f -Dcassandra.config=file:///etc/contrailconfigmaps/cassandra.${POD_IP}.yaml",
                ],
            ),
            ContainerSpec::new(
                "nodemanager",
                "contrail-nodemgr",
                &[
                    "bash",
                    "-c",
                    "ln -sf /etc/contrailconfigmaps/nodemanager.${POD_IP} /etc/contrail/contrail-database-nodemgr.conf && exec /usr/bin/contrail-nodemgr --nodetype=contrail-database",
                ],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::default_configuration;
    use crate::crd::CassandraSpec;
    use crate::strategy::testing::*;

    fn cassandra() -> Cassandra {
        Cassandra::new("cas1", CassandraSpec::default())
    }

    fn creds() -> crate::render::Credentials {
        credentials(&[(KEYSTORE_PASSWORD, "ks"), (TRUSTSTORE_PASSWORD, "ts")])
    }

    #[test]
    fn renders_one_yaml_and_nodemanager_per_instance_plus_keystore_script() {
        let ctx = context("cas1", &["10.0.0.2", "10.0.0.1"], &full_dependencies(), &creds());
        let data = cassandra().render(&ctx, &engine()).unwrap();

        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "cassandra.10.0.0.1.yaml",
                "cassandra.10.0.0.2.yaml",
                "keystore-init.sh",
                "nodemanager.10.0.0.1",
                "nodemanager.10.0.0.2",
            ]
        );
        assert!(data["cassandra.10.0.0.1.yaml"].contains("listen_address: 10.0.0.1"));
        assert!(data["cassandra.10.0.0.1.yaml"].contains("keystore_password: ks"));
        assert!(data["nodemanager.10.0.0.2"].contains("server_list=10.0.4.1:8086 10.0.4.2:8086"));
    }

    #[test]
    fn absent_config_tier_renders_an_empty_collector_list() {
        let mut deps = Dependencies::default();
        deps.insert(ServiceKind::Config, default_configuration(ServiceKind::Config));
        let ctx = context("cas1", &["10.0.0.1"], &deps, &creds());

        let data = cassandra().render(&ctx, &engine()).unwrap();

        assert!(data["nodemanager.10.0.0.1"].contains("server_list=\n"));
    }

    #[test]
    fn published_secret_carries_generated_keystore_passwords() {
        let secret = cassandra().published_secret().unwrap();
        let fields = secret.string_data.as_ref().unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("cas1-secret"));
        assert_eq!(fields[KEYSTORE_PASSWORD].len(), 20);
        assert_eq!(fields[TRUSTSTORE_PASSWORD].len(), 20);
    }

    #[test]
    fn config_tier_is_an_optional_dependency() {
        let deps = cassandra().dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, ServiceKind::Config);
        assert!(!deps[0].required);
    }
}
