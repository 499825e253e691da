//! Coordination service

use serde::Serialize;

use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::crd::{CommonConfiguration, ServiceKind, ServiceStatus, Zookeeper, ZookeeperParameters};
use crate::render::{ConfigData, Instance, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("zookeeper/zoo.cfg", ZOO_CFG),
    ("zookeeper/myid", MYID),
    ("zookeeper/zoo.servers", ZOO_SERVERS),
];

const ZOO_CFG: &str = r#"dataDir=/data
dataLogDir=/datalog
tickTime=2000
initLimit=5
syncLimit=2
maxClientCnxns=60
admin.enableServer=false
standaloneEnabled=false
4lw.commands.whitelist=stat,ruok,conf,isro
reconfigEnabled=true
skipACL=yes
clientPortAddress={{ instance.address }}
dynamicConfigFile=/conf/zoo.cfg.dynamic
"#;

const MYID: &str = "{{ params.members[instance.address] }}";

const ZOO_SERVERS: &str = r#"{% for member in instances %}
server.{{ params.members[member.address] }}={{ member.address }}:{{ params.server_port }}:{{ params.election_port }};{{ params.client_port }}
{% endfor %}"#;

/// Ports plus the ensemble server id of every member
#[derive(Serialize)]
struct EnsembleParameters {
    #[serde(flatten)]
    ports: ZookeeperParameters,
    members: std::collections::BTreeMap<String, u32>,
}

/// Server id of a member: ordinal plus one, or position plus one without an ordinal
fn server_id(instance: &Instance, position: usize) -> u32 {
    instance
        .identity
        .parse::<u32>()
        .map(|ordinal| ordinal + 1)
        .unwrap_or(position as u32 + 1)
}

impl ServiceStrategy for Zookeeper {
    const KIND: ServiceKind = ServiceKind::Zookeeper;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::DeleteFirst;

    fn common(&self) -> &CommonConfiguration {
        &self.spec.common_configuration
    }

    fn intent_status(&self) -> Option<&ServiceStatus> {
        self.status.as_ref()
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let params = EnsembleParameters {
            ports: self.parameters(),
            members: ctx
                .instances()
                .iter()
                .enumerate()
                .map(|(position, instance)| (instance.address.clone(), server_id(instance, position)))
                .collect(),
        };

        let mut data = ConfigData::new();
        render_per_instance(
            &mut data,
            ctx,
            templates,
            &[("zoo.cfg", "zookeeper/zoo.cfg"), ("myid", "zookeeper/myid")],
            &params,
        )?;
        data.insert(
            "zoo.servers".to_string(),
            templates.render("zookeeper/zoo.servers", ctx.cluster(&params))?,
        );
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        vec![ContainerSpec::new(
            "zookeeper",
            "contrail-external-zookeeper",
            &[
                "bash",
                "-c",
                "mkdir -p /data /conf && cp /etc/contrailconfigmaps/myid.${POD_IP} /data/myid && cp /etc/contrailconfigmaps/zoo.servers /conf/zoo.cfg.dynamic && exec zkServer.sh --config /etc/contrailconfigmaps start-foreground /etc/contrailconfigmaps/zoo.cfg.${POD_IP}",
            ],
        )]
    }
}
