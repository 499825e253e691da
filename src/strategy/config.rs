//! API/config tier

use serde::Serialize;

use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{
    CommonConfiguration, Config, ConfigParameters, KeystoneSettings, ServiceKind, ServiceStatus,
};
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("config/api", API),
    ("config/vnc_api_lib.ini", VNC_API_LIB),
    ("config/devicemanager", DEVICE_MANAGER),
    ("config/schematransformer", SCHEMA_TRANSFORMER),
    ("config/servicemonitor", SERVICE_MONITOR),
    ("config/analyticsapi", ANALYTICS_API),
    ("config/collector", COLLECTOR),
    ("config/nodemanager", NODEMANAGER),
    ("config/config.servers", CONFIG_SERVERS),
    ("config/sandesh", SANDESH),
];

/// Roles rendered once per instance
const ROLES: &[(&str, &str)] = &[
    ("api", "config/api"),
    ("vnc_api_lib.ini", "config/vnc_api_lib.ini"),
    ("devicemanager", "config/devicemanager"),
    ("schematransformer", "config/schematransformer"),
    ("servicemonitor", "config/servicemonitor"),
    ("analyticsapi", "config/analyticsapi"),
    ("collector", "config/collector"),
    ("nodemanager", "config/nodemanager"),
];

const SANDESH: &str = r#"
[SANDESH]
introspect_ssl_enable=True
sandesh_ssl_enable=True
sandesh_keyfile={{ cert_dir }}/server-key-{{ instance.address }}.pem
sandesh_certfile={{ cert_dir }}/server-{{ instance.address }}.crt
sandesh_ca_cert={{ ca_file }}
"#;

const API: &str = r#"[DEFAULTS]
listen_ip_addr={{ instance.address }}
listen_port={{ params.api_port }}
http_server_port={{ params.api_introspect_port }}
http_server_ip={{ instance.address }}
log_file=/var/log/contrail/contrail-api.log
log_level={{ params.log_level }}
log_local=1
list_optimization_enabled=True
auth={{ params.auth_mode }}
aaa_mode={{ params.aaa_mode }}
cloud_admin_role=admin
global_read_only_role=
cassandra_server_list={{ deps.cassandra.endpoints|join(' ') }}
cassandra_use_ssl=true
cassandra_ca_certs={{ ca_file }}
zk_server_ip={{ deps.zookeeper.endpoints|join(',') }}
rabbit_server={{ deps.rabbitmq.endpoints|join(',') }}
rabbit_vhost={{ creds.vhost|required }}
rabbit_user={{ creds.user|required }}
rabbit_password={{ creds.password|required }}
rabbit_use_ssl=True
kombu_ssl_keyfile={{ cert_dir }}/server-key-{{ instance.address }}.pem
kombu_ssl_certfile={{ cert_dir }}/server-{{ instance.address }}.crt
kombu_ssl_ca_certs={{ ca_file }}
kombu_ssl_version=tlsv1_2
collectors={{ addresses|with_port(params.collector_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const VNC_API_LIB: &str = r#"[global]
WEB_SERVER = {{ addresses|join(',') }}
WEB_PORT = {{ params.api_port }}
BASE_URL = /
use_ssl = True
cafile = {{ ca_file }}
{% if params.auth_mode == "keystone" %}
[auth]
AUTHN_TYPE = keystone
AUTHN_PROTOCOL = {{ params.keystone.auth_protocol }}
AUTHN_SERVER = {{ params.keystone.address }}
AUTHN_PORT = {{ params.keystone.port }}
AUTHN_URL = /v3/auth/tokens
AUTHN_DOMAIN = {{ params.keystone.project_domain }}
cafile = {{ ca_file }}
{% else %}
[auth]
AUTHN_TYPE = noauth
{% endif %}
"#;

const DEVICE_MANAGER: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
http_server_ip={{ instance.address }}
http_server_port={{ params.device_manager_introspect_port }}
api_server_ip={{ addresses|join(',') }}
api_server_port={{ params.api_port }}
api_server_use_ssl=True
analytics_server_ip={{ addresses|join(',') }}
analytics_server_port={{ params.analytics_port }}
cassandra_server_list={{ deps.cassandra.endpoints|join(' ') }}
cassandra_use_ssl=true
cassandra_ca_certs={{ ca_file }}
zk_server_ip={{ deps.zookeeper.endpoints|join(',') }}
rabbit_server={{ deps.rabbitmq.endpoints|join(',') }}
rabbit_vhost={{ creds.vhost }}
rabbit_user={{ creds.user }}
rabbit_password={{ creds.password }}
rabbit_use_ssl=True
log_file=/var/log/contrail/contrail-device-manager.log
log_level={{ params.log_level }}
log_local=1
collectors={{ addresses|with_port(params.collector_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const SCHEMA_TRANSFORMER: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
http_server_ip={{ instance.address }}
http_server_port={{ params.schema_introspect_port }}
api_server_ip={{ addresses|join(',') }}
api_server_port={{ params.api_port }}
api_server_use_ssl=True
cassandra_server_list={{ deps.cassandra.endpoints|join(' ') }}
cassandra_use_ssl=true
cassandra_ca_certs={{ ca_file }}
zk_server_ip={{ deps.zookeeper.endpoints|join(',') }}
rabbit_server={{ deps.rabbitmq.endpoints|join(',') }}
rabbit_vhost={{ creds.vhost }}
rabbit_user={{ creds.user }}
rabbit_password={{ creds.password }}
rabbit_use_ssl=True
log_file=/var/log/contrail/contrail-schema.log
log_level={{ params.log_level }}
log_local=1
collectors={{ addresses|with_port(params.collector_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const SERVICE_MONITOR: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
http_server_ip={{ instance.address }}
http_server_port={{ params.svc_monitor_introspect_port }}
api_server_ip={{ addresses|join(',') }}
api_server_port={{ params.api_port }}
api_server_use_ssl=True
cassandra_server_list={{ deps.cassandra.endpoints|join(' ') }}
cassandra_use_ssl=true
cassandra_ca_certs={{ ca_file }}
zk_server_ip={{ deps.zookeeper.endpoints|join(',') }}
rabbit_server={{ deps.rabbitmq.endpoints|join(',') }}
rabbit_vhost={{ creds.vhost }}
rabbit_user={{ creds.user }}
rabbit_password={{ creds.password }}
rabbit_use_ssl=True
log_file=/var/log/contrail/contrail-svc-monitor.log
log_level={{ params.log_level }}
log_local=1
collectors={{ addresses|with_port(params.collector_port)|join(' ') }}

[SCHEDULER]
analytics_server_list={{ addresses|with_port(params.analytics_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const ANALYTICS_API: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
http_server_port={{ params.analytics_introspect_port }}
http_server_ip={{ instance.address }}
rest_api_port={{ params.analytics_port }}
rest_api_ip={{ instance.address }}
aaa_mode={{ params.aaa_mode }}
log_file=/var/log/contrail/contrail-analytics-api.log
log_level={{ params.log_level }}
log_local=1
api_server={{ addresses|with_port(params.api_port)|join(' ') }}
api_server_use_ssl=True
zk_list={{ deps.zookeeper.endpoints|join(' ') }}
collectors={{ addresses|with_port(params.collector_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const COLLECTOR: &str = r#"[DEFAULT]
analytics_data_ttl={{ params.analytics_data_ttl }}
analytics_config_audit_ttl={{ params.analytics_config_audit_ttl }}
analytics_statistics_ttl={{ params.analytics_statistics_ttl }}
analytics_flow_ttl={{ params.analytics_flow_ttl }}
partitions=30
hostip={{ instance.address }}
hostname={{ instance.name }}
http_server_port={{ params.collector_introspect_port }}
http_server_ip={{ instance.address }}
syslog_port=-1
sflow_port=6343
ipfix_port=4739
log_file=/var/log/contrail/contrail-collector.log
log_level={{ params.log_level }}
log_local=1
zookeeper_server_list={{ deps.zookeeper.endpoints|join(',') }}

[COLLECTOR]
port={{ params.collector_port }}
server={{ instance.address }}

[API_SERVER]
api_server_list={{ addresses|with_port(params.api_port)|join(' ') }}
api_server_use_ssl=True

[DATABASE]
cassandra_server_list={{ deps.cassandra.port_endpoints.cql|join(' ') }}

[CONFIGDB]
config_db_server_list={{ deps.cassandra.port_endpoints.cql|join(' ') }}
config_db_use_ssl=true
config_db_ca_certs={{ ca_file }}
rabbitmq_server_list={{ deps.rabbitmq.endpoints|join(' ') }}
rabbitmq_vhost={{ creds.vhost }}
rabbitmq_user={{ creds.user }}
rabbitmq_password={{ creds.password }}
rabbitmq_use_ssl=True
{% include "config/sandesh" %}"#;

const NODEMANAGER: &str = r#"[DEFAULTS]
http_server_ip={{ instance.address }}
log_file=/var/log/contrail/config-nodemgr.log
log_level={{ params.log_level }}
log_local=1
hostname={{ instance.name }}
hostip={{ instance.address }}
db_port={{ deps.cassandra.ports.cql }}
db_jmx_port={{ deps.cassandra.ports.jmx }}
db_use_ssl=True

[COLLECTOR]
server_list={{ addresses|with_port(params.collector_port)|join(' ') }}
{% include "config/sandesh" %}"#;

const CONFIG_SERVERS: &str = r#"{% for member in instances %}
{{ member.address }}
{% endfor %}"#;

/// Tier parameters plus the resolved authentication settings
#[derive(Serialize)]
struct TierParameters {
    #[serde(flatten)]
    tunables: ConfigParameters,
    auth_mode: String,
    keystone: KeystoneSettings,
}

/// Credentials published by the broker an intent resolved
pub(super) fn broker_credentials(dependencies: &Dependencies) -> CredentialSource {
    let secret = dependencies
        .get(ServiceKind::Rabbitmq)
        .ok()
        .filter(|broker| broker.is_resolved())
        .and_then(|broker| broker.secret.clone());
    CredentialSource::new(secret, &[("user", "guest"), ("password", "guest"), ("vhost", "/")])
}

impl ServiceStrategy for Config {
    const KIND: ServiceKind = ServiceKind::Config;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::DeleteFirst;
    const DEPENDS_ON: &'static [ServiceKind] = &[
        ServiceKind::Cassandra,
        ServiceKind::Zookeeper,
        ServiceKind::Rabbitmq,
    ];

    fn common(&self) -> &CommonConfiguration {
        &self.spec.common_configuration
    }

    fn intent_status(&self) -> Option<&ServiceStatus> {
        self.status.as_ref()
    }

    fn dependencies(&self) -> Vec<DependencyRef> {
        let sc = &self.spec.service_configuration;
        vec![
            DependencyRef::required(ServiceKind::Cassandra, sc.cassandra_instance.as_ref()),
            DependencyRef::required(ServiceKind::Zookeeper, sc.zookeeper_instance.as_ref()),
            DependencyRef::required(ServiceKind::Rabbitmq, sc.rabbitmq_instance.as_ref()),
        ]
    }

    fn credential_source(&self, dependencies: &Dependencies) -> CredentialSource {
        broker_credentials(dependencies)
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let common = &self.spec.common_configuration;
        let params = TierParameters {
            tunables: self.parameters(),
            auth_mode: common.auth_mode().to_string(),
            keystone: common.keystone(),
        };

        let mut data = ConfigData::new();
        render_per_instance(&mut data, ctx, templates, ROLES, &params)?;
        data.insert(
            "config.servers".to_string(),
            templates.render("config/config.servers", ctx.cluster(&params))?,
        );
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        let daemon = |name: &'static str, image: &'static str, binary: &str| {
            let command = format!(
                "ln -sf /etc/contrailconfigmaps/vnc_api_lib.ini.${{POD_IP}} /etc/contrail/vnc_api_lib.ini && exec {binary} --conf_file /etc/contrailconfigmaps/{name}.${{POD_IP}}"
            );
            ContainerSpec {
                command: vec!["bash".to_string(), "-c".to_string(), command],
                ..ContainerSpec::new(name, image, &[])
            }
        };
        vec![
            daemon("api", "contrail-controller-config-api", "/usr/bin/contrail-api"),
            daemon(
                "devicemanager",
                "contrail-controller-config-devicemgr",
                "/usr/bin/contrail-device-manager",
            ),
            daemon(
                "schematransformer",
                "contrail-controller-config-schema",
                "/usr/bin/contrail-schema",
            ),
            daemon(
                "servicemonitor",
                "contrail-controller-config-svcmonitor",
                "/usr/bin/contrail-svc-monitor",
            ),
            daemon("analyticsapi", "contrail-analytics-api", "/usr/bin/contrail-analytics-api"),
            daemon("collector", "contrail-analytics-collector", "/usr/bin/contrail-collector"),
            daemon("nodemanager", "contrail-nodemgr", "/usr/bin/contrail-nodemgr"),
        ]
    }

    fn service_ports(&self) -> Vec<(&'static str, u16)> {
        let params = self.parameters();
        vec![("api", params.api_port), ("analytics", params.analytics_port)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ClusterConfiguration;
    use crate::crd::{AuthMode, AuthParameters, ConfigSpec};
    use crate::strategy::testing::*;

    fn creds() -> crate::render::Credentials {
        credentials(&[("user", "fabric"), ("password", "s3cret"), ("vhost", "tf")])
    }

    fn render(config: &Config, addresses: &[&str]) -> ConfigData {
        let ctx = context("cfg1", addresses, &full_dependencies(), &creds());
        config.render(&ctx, &engine()).unwrap()
    }

    #[test]
    fn every_role_is_rendered_for_every_instance() {
        let data = render(&Config::new("cfg1", ConfigSpec::default()), &["10.0.0.1", "10.0.0.2"]);

        for (role, _) in ROLES {
            assert!(data.contains_key(&format!("{role}.10.0.0.1")), "{role}");
            assert!(data.contains_key(&format!("{role}.10.0.0.2")), "{role}");
        }
        assert_eq!(data.len(), ROLES.len() * 2 + 1);
        assert_eq!(data["config.servers"], "10.0.0.1\n10.0.0.2\n");
    }

    #[test]
    fn api_file_carries_dependency_endpoints_and_broker_credentials() {
        let data = render(&Config::new("cfg1", ConfigSpec::default()), &["10.0.0.1"]);
        let api = &data["api.10.0.0.1"];

        assert!(api.contains("cassandra_server_list=10.0.1.1:9160 10.0.1.2:9160"));
        assert!(api.contains("zk_server_ip=10.0.2.1:2181,10.0.2.2:2181"));
        assert!(api.contains("rabbit_server=10.0.3.1:5673,10.0.3.2:5673"));
        assert!(api.contains("rabbit_user=fabric"));
        assert!(api.contains("rabbit_vhost=tf"));
        assert!(api.contains("collectors=10.0.0.1:8086"));
        assert!(api.contains("aaa_mode=no-auth"));
        assert!(api.contains("[SANDESH]"));
    }

    #[test]
    fn keystone_auth_switches_the_client_library_section() {
        let mut spec = ConfigSpec::default();
        spec.common_configuration.auth_parameters = Some(AuthParameters {
            auth_mode: AuthMode::Keystone,
            keystone: None,
        });
        let data = render(&Config::new("cfg1", spec), &["10.0.0.1"]);
        let ini = &data["vnc_api_lib.ini.10.0.0.1"];

        assert!(ini.contains("AUTHN_TYPE = keystone"));
        assert!(ini.contains("AUTHN_PORT = 5000"));
        assert!(data["api.10.0.0.1"].contains("aaa_mode=rbac"));
    }

    #[test]
    fn collector_reads_the_database_over_cql() {
        let data = render(&Config::new("cfg1", ConfigSpec::default()), &["10.0.0.1"]);
        assert!(data["collector.10.0.0.1"]
            .contains("cassandra_server_list=10.0.1.1:9042 10.0.1.2:9042"));
        assert!(data["collector.10.0.0.1"].contains("analytics_data_ttl=48"));
    }

    #[test]
    fn broker_credentials_follow_the_resolved_secret() {
        let source = broker_credentials(&full_dependencies());
        assert_eq!(source.secret.as_deref(), Some("rmq1-secret"));
        assert_eq!(source.defaults["user"], "guest");
    }

    #[test]
    fn absent_optional_broker_contributes_no_secret() {
        let mut deps = Dependencies::default();
        deps.insert(
            ServiceKind::Rabbitmq,
            ClusterConfiguration {
                secret: Some("stale-secret".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(broker_credentials(&deps).secret, None);
    }

    #[test]
    fn exposes_api_and_analytics_ports() {
        let config = Config::new("cfg1", ConfigSpec::default());
        assert_eq!(config.service_ports(), vec![("api", 8082), ("analytics", 8081)]);
        assert_eq!(config.dependencies().len(), 3);
        assert!(config.dependencies().iter().all(|d| d.required));
    }
}
