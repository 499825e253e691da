//! Message broker

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::aggregator::Dependencies;
use crate::crd::{CommonConfiguration, Rabbitmq, RabbitmqParameters, ServiceKind, ServiceStatus};
use crate::kube_utils::instance_labels;
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("rabbitmq/rabbitmq.conf", RABBITMQ_CONF),
    ("rabbitmq/rabbitmq-env.conf", RABBITMQ_ENV_CONF),
    ("rabbitmq/rabbitmq.nodes", RABBITMQ_NODES),
    ("rabbitmq/rabbitmq-common.env", RABBITMQ_COMMON_ENV),
    ("rabbitmq/definitions.json", DEFINITIONS_JSON),
];

const PLUGINS_CONF: &str =
    "[rabbitmq_management,rabbitmq_management_agent,rabbitmq_peer_discovery_k8s].";

const RABBITMQ_CONF: &str = r#"listeners.tcp = none
listeners.ssl.default = {{ params.port }}
loopback_users = none
management.tcp.port = 15671
management.load_definitions = /etc/rabbitmq/definitions.json
ssl_options.cacertfile = {{ ca_file }}
ssl_options.keyfile = {{ cert_dir }}/server-key-{{ instance.address }}.pem
ssl_options.certfile = {{ cert_dir }}/server-{{ instance.address }}.crt
ssl_options.verify = verify_peer
ssl_options.fail_if_no_peer_cert = true
cluster_partition_handling = {{ params.cluster_partition_handling }}
cluster_formation.peer_discovery_backend = rabbit_peer_discovery_classic_config
{% for member in instances %}
cluster_formation.classic_config.nodes.{{ loop.index }} = rabbit@{{ member.address }}
{% endfor %}
log.console.level = info
"#;

const RABBITMQ_ENV_CONF: &str = r#"HOME=/var/lib/rabbitmq
NODENAME=rabbit@{{ instance.address }}
"#;

const RABBITMQ_NODES: &str = r#"{% for member in instances %}
{{ member.address }}
{% endfor %}"#;

const RABBITMQ_COMMON_ENV: &str = r#"export RABBITMQ_ERLANG_COOKIE={{ params.erlang_cookie }}
export RABBITMQ_CONFIG_FILE=/etc/rabbitmq/rabbitmq.conf
export RABBITMQ_CONF_ENV_FILE=/etc/rabbitmq/rabbitmq-env.conf
export RABBITMQ_ENABLED_PLUGINS_FILE=/etc/rabbitmq/plugins.conf
export RABBITMQ_USE_LONGNAME=true
export RABBITMQ_PID_FILE=/var/run/rabbitmq.pid
"#;

const DEFINITIONS_JSON: &str = r#"{
  "users": [
    {
      "name": {{ creds.user|required|tojson }},
      "password_hash": {{ params.password_hash|tojson }},
      "hashing_algorithm": "rabbit_password_hashing_sha256",
      "tags": "administrator"
    }
  ],
  "vhosts": [
    {
      "name": {{ creds.vhost|required|tojson }}
    }
  ],
  "permissions": [
    {
      "user": {{ creds.user|tojson }},
      "vhost": {{ creds.vhost|tojson }},
      "configure": ".*",
      "write": ".*",
      "read": ".*"
    }
  ],
  "policies": [
    {
      "vhost": {{ creds.vhost|tojson }},
      "name": "ha",
      "pattern": "",
      "apply-to": "all",
      "definition": {
        "ha-mode": {{ params.mirrored_queue_mode|tojson }},
        "ha-sync-mode": "automatic"
      },
      "priority": 0
    }
  ]
}
"#;

/// Broker parameters plus the hashed default user password
#[derive(Serialize)]
struct BrokerParameters {
    #[serde(flatten)]
    tunables: RabbitmqParameters,
    password_hash: String,
}

/// Salted SHA-256 hash in the broker's definitions format
///
/// The salt is derived from the instance name and password so the same
/// inputs always render the same definitions.
fn password_hash(instance: &str, password: &str) -> String {
    let seed = Sha256::digest(format!("{instance}\0{password}").as_bytes());
    let salt = &seed[..4];

    let mut salted = salt.to_vec();
    salted.extend_from_slice(password.as_bytes());
    let digest = Sha256::digest(&salted);

    let mut hashed = salt.to_vec();
    hashed.extend_from_slice(&digest);
    STANDARD.encode(hashed)
}

impl ServiceStrategy for Rabbitmq {
    const KIND: ServiceKind = ServiceKind::Rabbitmq;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::Rolling;

    fn common(&self) -> &CommonConfiguration {
        &self.spec.common_configuration
    }

    fn intent_status(&self) -> Option<&ServiceStatus> {
        self.status.as_ref()
    }

    fn credential_source(&self, _dependencies: &Dependencies) -> CredentialSource {
        let params = self.parameters();
        CredentialSource::new(
            Some(params.secret.clone()),
            &[
                ("user", params.user.as_str()),
                ("password", params.password.as_str()),
                ("vhost", params.vhost.as_str()),
            ],
        )
    }

    fn published_secret(&self) -> Option<Secret> {
        let params = self.parameters();
        Some(Secret {
            metadata: ObjectMeta {
                name: Some(params.secret),
                labels: Some(instance_labels(Self::KIND, &self.name_any())),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([
                ("user".to_string(), params.user),
                ("password".to_string(), params.password),
                ("vhost".to_string(), params.vhost),
            ])),
            ..Default::default()
        })
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let tunables = self.parameters();
        let password = ctx.credentials().get("password").unwrap_or_default();
        let params = BrokerParameters {
            password_hash: password_hash(&self.name_any(), password),
            tunables,
        };

        let mut data = ConfigData::new();
        render_per_instance(
            &mut data,
            ctx,
            templates,
            &[
                ("rabbitmq.conf", "rabbitmq/rabbitmq.conf"),
                ("rabbitmq-env.conf", "rabbitmq/rabbitmq-env.conf"),
            ],
            &params,
        )?;
        for instance in ctx.instances() {
            data.insert(
                format!("rabbitmq.node.{}", instance.identity),
                instance.address.clone(),
            );
        }

        let cluster = ctx.cluster(&params);
        for (key, template) in [
            ("rabbitmq.nodes", "rabbitmq/rabbitmq.nodes"),
            ("rabbitmq-common.env", "rabbitmq/rabbitmq-common.env"),
            ("definitions.json", "rabbitmq/definitions.json"),
        ] {
            data.insert(key.to_string(), templates.render(template, cluster.clone())?);
        }
        data.insert("plugins.conf".to_string(), PLUGINS_CONF.to_string());
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        vec![ContainerSpec::new(
            "rabbitmq",
            "contrail-external-rabbitmq",
            &[
                "bash",
                "-c",
                "mkdir -p /etc/rabbitmq && cp /etc/contrailconfigmaps/rabbitmq.conf.${POD_IP} /etc/rabbitmq/rabbitmq.conf && cp /etc/contrailconfigmaps/rabbitmq-env.conf.${POD_IP} /etc/rabbitmq/rabbitmq-env.conf && cp /etc/contrailconfigmaps/plugins.conf /etc/contrailconfigmaps/definitions.json /etc/rabbitmq/ && source /etc/contrailconfigmaps/rabbitmq-common.env && exec rabbitmq-server",
            ],
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RabbitmqSpec;
    use crate::strategy::testing::*;

    fn rabbitmq() -> Rabbitmq {
        Rabbitmq::new("rmq1", RabbitmqSpec::default())
    }

    fn render(addresses: &[&str]) -> ConfigData {
        let creds = credentials(&[("user", "fabric"), ("password", "s3cret"), ("vhost", "/")]);
        let ctx = context("rmq1", addresses, &Dependencies::default(), &creds);
        rabbitmq().render(&ctx, &engine()).unwrap()
    }

    #[test]
    fn renders_per_instance_files_and_cluster_files() {
        let data = render(&["10.0.0.1", "10.0.0.2"]);

        assert_eq!(data["rabbitmq-env.conf.10.0.0.2"], "HOME=/var/lib/rabbitmq\nNODENAME=rabbit@10.0.0.2\n");
        assert_eq!(data["rabbitmq.node.0"], "10.0.0.1");
        assert_eq!(data["rabbitmq.node.1"], "10.0.0.2");
        assert_eq!(data["rabbitmq.nodes"], "10.0.0.1\n10.0.0.2\n");
        assert!(data["rabbitmq.conf.10.0.0.1"].contains("listeners.ssl.default = 5673"));
        assert!(data["rabbitmq.conf.10.0.0.1"]
            .contains("cluster_formation.classic_config.nodes.2 = rabbit@10.0.0.2"));
        assert!(data.contains_key("plugins.conf"));
        assert!(data["rabbitmq-common.env"].contains("RABBITMQ_USE_LONGNAME=true"));
    }

    #[test]
    fn definitions_are_valid_json_and_deterministic() {
        let first = render(&["10.0.0.1"]);
        let second = render(&["10.0.0.1"]);
        assert_eq!(first["definitions.json"], second["definitions.json"]);

        let definitions: serde_json::Value =
            serde_json::from_str(&first["definitions.json"]).unwrap();
        assert_eq!(definitions["users"][0]["name"], "fabric");
        assert_eq!(definitions["policies"][0]["definition"]["ha-mode"], "all");
    }

    #[test]
    fn password_hash_embeds_its_salt() {
        let hash = STANDARD.decode(password_hash("rmq1", "s3cret")).unwrap();
        assert_eq!(hash.len(), 4 + 32);
        assert_ne!(password_hash("rmq1", "s3cret"), password_hash("rmq1", "other"));
    }

    #[test]
    fn credentials_come_from_the_published_secret() {
        let source = rabbitmq().credential_source(&Dependencies::default());
        assert_eq!(source.secret.as_deref(), Some("rmq1-secret"));
        assert_eq!(source.defaults["vhost"], "/");

        let secret = rabbitmq().published_secret().unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("rmq1-secret"));
        assert_eq!(secret.string_data.unwrap()["user"], "guest");
    }
}
