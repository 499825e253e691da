//! Per-node data-plane agent
//!
//! Runs as a DaemonSet on the host network. The rendered files are shared by
//! every node; each agent substitutes its own host address from the
//! environment when it starts.

use serde::Serialize;

use super::config::broker_credentials;
use super::{ServiceStrategy, TemplateEngine};
use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{CommonConfiguration, ServiceKind, ServiceStatus, Vrouter, VrouterParameters};
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy, WorkloadKind};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("vrouter/vrouter-agent.conf", AGENT_CONF),
    ("vrouter/vrouter.env", VROUTER_ENV),
];

const AGENT_CONF: &str = r#"[CONTROL-NODE]
servers={{ deps.config.addresses|with_port(params.xmpp_port)|join(' ') }}

[DEFAULT]
http_server_ip=${HOST_IP}
collectors={{ deps.config.port_endpoints.collector|join(' ') }}
log_file=/var/log/contrail/contrail-vrouter-agent.log
log_level={{ params.log_level }}
log_local=1
xmpp_dns_auth_enable=True
xmpp_auth_enable=True
xmpp_server_cert={{ cert_dir }}/server-${HOST_IP}.crt
xmpp_server_key={{ cert_dir }}/server-key-${HOST_IP}.pem
xmpp_ca_cert={{ ca_file }}
physical_interface_mac=${PHYSICAL_INTERFACE_MAC}

[DNS]
servers={{ deps.config.addresses|with_port(params.dns_port)|join(' ') }}

[METADATA]
metadata_proxy_secret={{ params.metadata_secret }}

[NETWORKS]
control_network_ip=${HOST_IP}

[VIRTUAL-HOST-INTERFACE]
name=vhost0
ip=${HOST_IP}/${HOST_PREFIX}
{% if params.gateway %}gateway={{ params.gateway }}
{% endif %}physical_interface={{ params.physical_interface }}
{% if deps.rabbitmq.addresses %}
[RABBITMQ]
servers={{ deps.rabbitmq.endpoints|join(',') }}
vhost={{ creds.vhost }}
user={{ creds.user }}
password={{ creds.password }}
use_ssl=True
{% endif %}
[SANDESH]
introspect_ssl_enable=True
sandesh_ssl_enable=True
sandesh_keyfile={{ cert_dir }}/server-key-${HOST_IP}.pem
sandesh_certfile={{ cert_dir }}/server-${HOST_IP}.crt
sandesh_ca_cert={{ ca_file }}
"#;

const VROUTER_ENV: &str = r#"PHYSICAL_INTERFACE={{ params.physical_interface }}
VROUTER_GATEWAY={{ params.gateway }}
CONTROLLER_NODES={{ deps.config.addresses|join(',') }}
CONFIG_API_PORT={{ deps.config.port }}
CLOUD_ORCHESTRATOR=kubernetes
"#;

/// XMPP port of the control nodes
const XMPP_PORT: u16 = 5269;
/// DNS port of the control nodes
const DNS_PORT: u16 = 53;

#[derive(Serialize)]
struct AgentParameters {
    #[serde(flatten)]
    tunables: VrouterParameters,
    xmpp_port: u16,
    dns_port: u16,
}

impl ServiceStrategy for Vrouter {
    const KIND: ServiceKind = ServiceKind::Vrouter;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::Rolling;
    const DEPENDS_ON: &'static [ServiceKind] = &[ServiceKind::Config, ServiceKind::Rabbitmq];
    const WORKLOAD_KIND: WorkloadKind = WorkloadKind::DaemonSet;

    fn common(&self) -> &CommonConfiguration {
        &self.spec.common_configuration
    }

    fn intent_status(&self) -> Option<&ServiceStatus> {
        self.status.as_ref()
    }

    fn dependencies(&self) -> Vec<DependencyRef> {
        let sc = &self.spec.service_configuration;
        vec![
            DependencyRef::required(ServiceKind::Config, sc.config_instance.as_ref()),
            DependencyRef::optional(ServiceKind::Rabbitmq, sc.rabbitmq_instance.as_ref()),
        ]
    }

    fn credential_source(&self, dependencies: &Dependencies) -> CredentialSource {
        broker_credentials(dependencies)
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let params = AgentParameters {
            tunables: self.parameters(),
            xmpp_port: XMPP_PORT,
            dns_port: DNS_PORT,
        };
        let cluster = ctx.cluster(&params);

        let mut data = ConfigData::new();
        data.insert(
            "vrouter-agent.conf".to_string(),
            templates.render("vrouter/vrouter-agent.conf", cluster.clone())?,
        );
        data.insert(
            "vrouter.env".to_string(),
            templates.render("vrouter/vrouter.env", cluster)?,
        );
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        vec![
            ContainerSpec::new(
                "vrouteragent",
                "contrail-vrouter-agent",
                &[
                    "bash",
                    "-c",
                    "source /etc/contrailconfigmaps/vrouter.env && export HOST_IP=${POD_IP} HOST_PREFIX=$(ip -o -4 addr show dev ${PHYSICAL_INTERFACE} | awk '{print $4}' | cut -d/ -f2) PHYSICAL_INTERFACE_MAC=$(cat /sys/class/net/${PHYSICAL_INTERFACE}/address) && envsubst < /etc/contrailconfigmaps/vrouter-agent.conf > /etc/contrail/contrail-vrouter-agent.conf && exec /usr/bin/contrail-vrouter-agent",
                ],
            )
            .privileged(),
            ContainerSpec::new(
                "nodemanager",
                "contrail-nodemgr",
                &[
                    "bash",
                    "-c",
                    "exec /usr/bin/contrail-nodemgr --nodetype=contrail-vrouter",
                ],
            ),
        ]
    }

    /// Always on for the node agent
    fn host_network(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::default_configuration;
    use crate::crd::VrouterSpec;
    use crate::strategy::testing::*;

    fn creds() -> crate::render::Credentials {
        credentials(&[("user", "fabric"), ("password", "s3cret"), ("vhost", "/")])
    }

    #[test]
    fn renders_cluster_wide_agent_files_pointing_at_control_nodes() {
        let ctx = context("vr1", &["192.168.0.10", "192.168.0.11"], &full_dependencies(), &creds());

        let data = Vrouter::new("vr1", VrouterSpec::default())
            .render(&ctx, &engine())
            .unwrap();

        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["vrouter-agent.conf", "vrouter.env"]);
        let agent = &data["vrouter-agent.conf"];
        assert!(agent.contains("servers=10.0.4.1:5269 10.0.4.2:5269"));
        assert!(agent.contains("physical_interface=eth0"));
        assert!(agent.contains("metadata_proxy_secret=contrail"));
        assert!(!agent.contains("gateway="));
        assert!(agent.contains("[RABBITMQ]\nservers=10.0.3.1:5673,10.0.3.2:5673"));
        assert!(data["vrouter.env"].contains("CONTROLLER_NODES=10.0.4.1,10.0.4.2"));
    }

    #[test]
    fn absent_broker_omits_the_rabbitmq_section() {
        let mut deps = full_dependencies();
        deps.insert(ServiceKind::Rabbitmq, default_configuration(ServiceKind::Rabbitmq));
        let mut spec = VrouterSpec::default();
        spec.service_configuration.gateway = Some("192.168.0.1".to_string());
        let ctx = context("vr1", &["192.168.0.10"], &deps, &creds());

        let data = Vrouter::new("vr1", spec).render(&ctx, &engine()).unwrap();

        assert!(!data["vrouter-agent.conf"].contains("[RABBITMQ]"));
        assert!(data["vrouter-agent.conf"].contains("gateway=192.168.0.1\n"));
    }

    #[test]
    fn runs_privileged_on_the_host_network_as_a_daemonset() {
        let vrouter = Vrouter::new("vr1", VrouterSpec::default());

        assert!(vrouter.host_network());
        assert_eq!(Vrouter::WORKLOAD_KIND, WorkloadKind::DaemonSet);
        assert!(vrouter.containers()[0].privileged);
        assert!(!vrouter.dependencies()[1].required);
    }
}
