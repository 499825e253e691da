//! Topology/analytics tier

use serde::Serialize;

use super::config::broker_credentials;
use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{
    AnalyticsSnmp, AnalyticsSnmpParameters, CommonConfiguration, KeystoneSettings, ServiceKind,
    ServiceStatus,
};
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("analyticssnmp/tf-snmp-collector", SNMP_COLLECTOR),
    ("analyticssnmp/tf-topology", TOPOLOGY),
    ("analyticssnmp/vnc_api_lib.ini", VNC_API_LIB),
];

const SNMP_COLLECTOR: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
scan_frequency={{ params.scan_frequency }}
fast_scan_frequency={{ params.fast_scan_frequency }}
http_server_port={{ params.collector_introspect_port }}
http_server_ip={{ instance.address }}
log_file=/var/log/contrail/tf-snmp-collector.log
log_level={{ params.log_level }}
log_local=1
collectors={{ deps.config.port_endpoints.collector|join(' ') }}
zookeeper={{ deps.zookeeper.endpoints|join(',') }}

[CONFIGDB]
config_db_server_list={{ deps.cassandra.port_endpoints.cql|join(' ') }}
config_db_use_ssl=true
config_db_ca_certs={{ ca_file }}
rabbitmq_server_list={{ deps.rabbitmq.endpoints|join(' ') }}
rabbitmq_vhost={{ creds.vhost|required }}
rabbitmq_user={{ creds.user|required }}
rabbitmq_password={{ creds.password|required }}
rabbitmq_use_ssl=True

[API_SERVER]
api_server_list={{ deps.config.endpoints|join(' ') }}
api_server_use_ssl=True
{% include "config/sandesh" %}"#;

const TOPOLOGY: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
scan_frequency={{ params.topology_scan_frequency }}
http_server_port={{ params.topology_introspect_port }}
http_server_ip={{ instance.address }}
log_file=/var/log/contrail/tf-topology.log
log_level={{ params.log_level }}
log_local=1
analytics_api={{ deps.config.port_endpoints.analytics|join(' ') }}
collectors={{ deps.config.port_endpoints.collector|join(' ') }}
zookeeper={{ deps.zookeeper.endpoints|join(',') }}

[CONFIGDB]
config_db_server_list={{ deps.cassandra.port_endpoints.cql|join(' ') }}
config_db_use_ssl=true
config_db_ca_certs={{ ca_file }}
rabbitmq_server_list={{ deps.rabbitmq.endpoints|join(' ') }}
rabbitmq_vhost={{ creds.vhost }}
rabbitmq_user={{ creds.user }}
rabbitmq_password={{ creds.password }}
rabbitmq_use_ssl=True

[API_SERVER]
api_server_list={{ deps.config.endpoints|join(' ') }}
api_server_use_ssl=True
{% include "config/sandesh" %}"#;

const VNC_API_LIB: &str = r#"[global]
WEB_SERVER = {{ deps.config.addresses|join(',') }}
WEB_PORT = {{ deps.config.port }}
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

#[derive(Serialize)]
struct SnmpParameters {
    #[serde(flatten)]
    tunables: AnalyticsSnmpParameters,
    auth_mode: String,
    keystone: KeystoneSettings,
}

impl ServiceStrategy for AnalyticsSnmp {
    const KIND: ServiceKind = ServiceKind::AnalyticsSnmp;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::Rolling;
    const DEPENDS_ON: &'static [ServiceKind] = &[
        ServiceKind::Cassandra,
        ServiceKind::Zookeeper,
        ServiceKind::Rabbitmq,
        ServiceKind::Config,
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
            DependencyRef::required(ServiceKind::Config, sc.config_instance.as_ref()),
        ]
    }

    fn credential_source(&self, dependencies: &Dependencies) -> CredentialSource {
        broker_credentials(dependencies)
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let common = &self.spec.common_configuration;
        let params = SnmpParameters {
            tunables: self.parameters(),
            auth_mode: common.auth_mode().to_string(),
            keystone: common.keystone(),
        };

        let mut data = ConfigData::new();
        render_per_instance(
            &mut data,
            ctx,
            templates,
            &[
                ("tf-snmp-collector", "analyticssnmp/tf-snmp-collector"),
                ("tf-topology", "analyticssnmp/tf-topology"),
                ("vnc_api_lib.ini", "analyticssnmp/vnc_api_lib.ini"),
            ],
            &params,
        )?;
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        vec![
            ContainerSpec::new(
                "analytics-snmp-collector",
                "contrail-analytics-snmp-collector",
                &[
                    "bash",
                    "-c",
                    "ln -sf /etc/contrailconfigmaps/vnc_api_lib.ini.${POD_IP} /etc/contrail/vnc_api_lib.ini && exec /usr/bin/tf-snmp-collector -c /etc/contrailconfigmaps/tf-snmp-collector.${POD_IP} --device_config_file /etc/contrail/device.ini",
                ],
            ),
            ContainerSpec::new(
                "analytics-snmp-topology",
                "contrail-analytics-snmp-topology",
                &[
                    "bash",
                    "-c",
                    "ln -sf /etc/contrailconfigmaps/vnc_api_lib.ini.${POD_IP} /etc/contrail/vnc_api_lib.ini && exec /usr/bin/tf-topology -c /etc/contrailconfigmaps/tf-topology.${POD_IP}",
                ],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AnalyticsSnmpSpec;
    use crate::strategy::testing::*;

    #[test]
    fn renders_three_files_per_instance_from_provider_endpoints() {
        let creds = credentials(&[("user", "fabric"), ("password", "s3cret"), ("vhost", "/")]);
        let ctx = context("snmp1", &["10.0.5.1"], &full_dependencies(), &creds);

        let data = AnalyticsSnmp::new("snmp1", AnalyticsSnmpSpec::default())
            .render(&ctx, &engine())
            .unwrap();

        assert_eq!(data.len(), 3);
        let collector = &data["tf-snmp-collector.10.0.5.1"];
        assert!(collector.contains("scan_frequency=600"));
        assert!(collector.contains("collectors=10.0.4.1:8086 10.0.4.2:8086"));
        assert!(collector.contains("config_db_server_list=10.0.1.1:9042 10.0.1.2:9042"));
        assert!(data["tf-topology.10.0.5.1"].contains("analytics_api=10.0.4.1:8081 10.0.4.2:8081"));
        assert!(data["vnc_api_lib.ini.10.0.5.1"].contains("WEB_SERVER = 10.0.4.1,10.0.4.2"));
    }

    #[test]
    fn missing_broker_credentials_fail_the_render() {
        let ctx = context("snmp1", &["10.0.5.1"], &full_dependencies(), &credentials(&[]));

        let result = AnalyticsSnmp::new("snmp1", AnalyticsSnmpSpec::default()).render(&ctx, &engine());

        assert!(matches!(result, Err(Error::Render(_))));
    }

    #[test]
    fn depends_on_every_provider() {
        let deps = AnalyticsSnmp::new("snmp1", AnalyticsSnmpSpec::default()).dependencies();
        let kinds: Vec<ServiceKind> = deps.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ServiceKind::Cassandra,
                ServiceKind::Zookeeper,
                ServiceKind::Rabbitmq,
                ServiceKind::Config,
            ]
        );
    }
}
