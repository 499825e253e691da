//! Web console

use serde::Serialize;

use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::aggregator::DependencyRef;
use crate::crd::{
    CommonConfiguration, KeystoneSettings, ServiceKind, ServiceStatus, Webui, WebuiParameters,
};
use crate::render::{ConfigData, RenderContext};
use crate::workload::{ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("webui/config.global.js", CONFIG_GLOBAL),
    ("webui/contrail-webui-userauth.js", USER_AUTH),
];

const CONFIG_GLOBAL: &str = r#"var config = {};
config.orchestration = {};
config.orchestration.Manager = "none";
config.endpoints = {};
config.endpoints.apiServiceType = "ApiServer";
config.endpoints.opServiceType = "OpServer";
config.regionsFromConfig = false;
config.serviceEndPointFromConfig = true;
config.multi_tenancy = {};
config.multi_tenancy.enabled = {{ (params.auth_mode == "keystone")|tojson }};
config.identityManager = {};
config.identityManager.ip = {{ params.keystone.address|tojson }};
config.identityManager.port = {{ params.keystone.port|tojson }};
config.identityManager.authProtocol = {{ params.keystone.auth_protocol|tojson }};
config.identityManager.apiVersion = ["v3"];
config.cnfg = {};
config.cnfg.server_ip = {{ deps.config.addresses|tojson }};
config.cnfg.server_port = {{ deps.config.port|string|tojson }};
config.cnfg.authProtocol = "https";
config.cnfg.strictSSL = false;
config.cnfg.ca = {{ ca_file|tojson }};
config.analytics = {};
config.analytics.server_ip = {{ deps.config.addresses|tojson }};
config.analytics.server_port = {{ deps.config.ports.analytics|string|tojson }};
config.analytics.authProtocol = "https";
config.analytics.strictSSL = false;
config.analytics.ca = {{ ca_file|tojson }};
config.cassandra = {};
config.cassandra.server_ips = {{ deps.cassandra.addresses|tojson }};
config.cassandra.server_port = {{ deps.cassandra.ports.cql|string|tojson }};
config.cassandra.enable_edit = false;
config.cassandra.use_ssl = true;
config.cassandra.ca_certs = {{ ca_file|tojson }};
config.jobServer = {};
config.jobServer.server_ip = "127.0.0.1";
config.jobServer.server_port = "3000";
config.files = {};
config.files.download_path = "/tmp";
config.redis_server_port = "6380";
config.redis_server_ip = "127.0.0.1";
config.redis_dump_file = "/var/lib/redis/dump-webui.rdb";
config.redis_password = "";
config.logo_file = "/opt/contrail/images/logo.png";
config.favicon_file = "/opt/contrail/images/favicon.ico";
config.featurePkg = {};
config.featurePkg.webController = {};
config.featurePkg.webController.path = "/usr/src/contrail/contrail-web-controller";
config.featurePkg.webController.enable = true;
config.qe = {};
config.qe.enable_stat_queries = false;
config.logs = {};
config.logs.level = "debug";
config.getDomainProjectsFromApiServer = false;
config.network = {};
config.network.L2_enable = false;
config.getDomainsFromApiServer = false;
config.jsonSchemaPath = "/usr/src/contrail/contrail-web-core/src/serverroot/configJsonSchemas";
config.server_options = {};
config.server_options.key_file = {{ (cert_dir ~ "/server-key-" ~ instance.address ~ ".pem")|tojson }};
config.server_options.cert_file = {{ (cert_dir ~ "/server-" ~ instance.address ~ ".crt")|tojson }};
config.server_options.ciphers = "ECDHE-RSA-AES256-SHA384:ECDHE-RSA-AES256-SHA256";
config.http_port = {{ params.http_port|string|tojson }};
config.https_port = {{ params.https_port|string|tojson }};
module.exports = config;
"#;

const USER_AUTH: &str = r#"var auth = {};
auth.admin_user = {{ params.keystone.admin_username|tojson }};
auth.admin_password = {{ params.keystone.admin_password|tojson }};
auth.admin_token = "";
auth.admin_tenant_name = {{ params.keystone.project|tojson }};
auth.project_domain_name = {{ params.keystone.project_domain|tojson }};
auth.user_domain_name = {{ params.keystone.user_domain|tojson }};
module.exports = auth;
"#;

#[derive(Serialize)]
struct ConsoleParameters {
    #[serde(flatten)]
    ports: WebuiParameters,
    auth_mode: String,
    keystone: KeystoneSettings,
}

impl ServiceStrategy for Webui {
    const KIND: ServiceKind = ServiceKind::Webui;
    const UPDATE_STRATEGY: UpdateStrategy = UpdateStrategy::Rolling;
    const DEPENDS_ON: &'static [ServiceKind] = &[ServiceKind::Config, ServiceKind::Cassandra];

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
            DependencyRef::required(ServiceKind::Cassandra, sc.cassandra_instance.as_ref()),
        ]
    }

    fn render(&self, ctx: &RenderContext, templates: &TemplateEngine) -> Result<ConfigData, Error> {
        let common = &self.spec.common_configuration;
        let params = ConsoleParameters {
            ports: self.parameters(),
            auth_mode: common.auth_mode().to_string(),
            keystone: common.keystone(),
        };

        let mut data = ConfigData::new();
        render_per_instance(
            &mut data,
            ctx,
            templates,
            &[
                ("config.global.js", "webui/config.global.js"),
                ("contrail-webui-userauth.js", "webui/contrail-webui-userauth.js"),
            ],
            &params,
        )?;
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        let link = "ln -sf /etc/contrailconfigmaps/config.global.js.${POD_IP} /etc/contrail/config.global.js && ln -sf /etc/contrailconfigmaps/contrail-webui-userauth.js.${POD_IP} /etc/contrail/contrail-webui-userauth.js";
        vec![
            ContainerSpec::new(
                "webuiweb",
                "contrail-controller-webui-web",
                &[
                    "bash",
                    "-c",
                    &format!("{link} && exec /usr/bin/node /usr/src/contrail/contrail-web-core/webServerStart.js --conf_file /etc/contrail/config.global.js"),
                ],
            ),
            ContainerSpec::new(
                "webuijob",
                "contrail-controller-webui-job",
                &[
                    "bash",
                    "-c",
                    &format!("{link} && exec /usr/bin/node /usr/src/contrail/contrail-web-core/jobServerStart.js --conf_file /etc/contrail/config.global.js"),
                ],
            ),
            ContainerSpec::new(
                "redis",
                "contrail-external-redis",
                &["redis-server", "--lua-time-limit", "15000", "--dbfilename", "", "--bind", "127.0.0.1", "--port", "6380"],
            ),
        ]
    }

    fn service_ports(&self) -> Vec<(&'static str, u16)> {
        let params = self.parameters();
        vec![("https", params.https_port), ("http", params.http_port)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthMode, AuthParameters, WebuiSpec};
    use crate::render::Credentials;
    use crate::strategy::testing::*;

    fn render(webui: &Webui) -> ConfigData {
        let ctx = context("ui1", &["10.0.6.1"], &full_dependencies(), &Credentials::default());
        webui.render(&ctx, &engine()).unwrap()
    }

    #[test]
    fn console_points_at_the_config_and_database_tiers() {
        let data = render(&Webui::new("ui1", WebuiSpec::default()));

        assert_eq!(data.len(), 2);
        let global = &data["config.global.js.10.0.6.1"];
        assert!(global.contains(r#"config.cnfg.server_ip = ["10.0.4.1","10.0.4.2"];"#));
        assert!(global.contains(r#"config.cnfg.server_port = "8082";"#));
        assert!(global.contains(r#"config.analytics.server_port = "8081";"#));
        assert!(global.contains(r#"config.cassandra.server_ips = ["10.0.1.1","10.0.1.2"];"#));
        assert!(global.contains(r#"config.multi_tenancy.enabled = false;"#));
        assert!(global.contains(r#"config.https_port = "8143";"#));
    }

    #[test]
    fn keystone_mode_enables_multi_tenancy() {
        let mut spec = WebuiSpec::default();
        spec.common_configuration.auth_parameters = Some(AuthParameters {
            auth_mode: AuthMode::Keystone,
            keystone: None,
        });

        let data = render(&Webui::new("ui1", spec));

        assert!(data["config.global.js.10.0.6.1"].contains("config.multi_tenancy.enabled = true;"));
        assert!(data["contrail-webui-userauth.js.10.0.6.1"].contains(r#"auth.admin_user = "admin";"#));
    }

    #[test]
    fn exposes_https_and_http_ports() {
        let webui = Webui::new("ui1", WebuiSpec::default());
        assert_eq!(webui.service_ports(), vec![("https", 8143), ("http", 8180)]);
        assert!(webui.dependencies().iter().all(|d| d.required));
    }
}
