//! Kubernetes API bridge
//!
//! The bridge authenticates to the Kubernetes API with its service account
//! token. The token is never rendered: the file carries a `${KUBE_TOKEN}`
//! placeholder that the container substitutes from the mounted token when
//! it starts.

use super::config::broker_credentials;
use super::{render_per_instance, ServiceStrategy, TemplateEngine};
use crate::aggregator::{DependencyRef, Dependencies};
use crate::crd::{CommonConfiguration, Kubemanager, ServiceKind, ServiceStatus};
use crate::render::{ConfigData, CredentialSource, RenderContext};
use crate::workload::{rule, AccessGrant, ContainerSpec, UpdateStrategy};
use crate::Error;

pub(super) const TEMPLATES: &[(&str, &str)] = &[
    ("kubemanager/kubemanager", KUBEMANAGER),
    ("kubemanager/vnc", VNC_API_LIB),
];

/// Roles rendered once per instance
const ROLES: &[(&str, &str)] = &[
    ("kubemanager", "kubemanager/kubemanager"),
    ("vnc", "kubemanager/vnc"),
];

const KUBEMANAGER: &str = r#"[DEFAULTS]
host_ip={{ instance.address }}
orchestrator={{ params.cloud_orchestrator }}
token=${KUBE_TOKEN}
log_file=/var/log/contrail/contrail-kube-manager.log
log_level={{ params.log_level }}
log_local=1
nested_mode=0
http_server_ip=0.0.0.0

[KUBERNETES]
kubernetes_api_server={{ params.kubernetes_api_server }}
kubernetes_api_port={{ params.kubernetes_api_port }}
kubernetes_api_secure_port={{ params.kubernetes_api_ssl_port }}
cluster_name={{ params.kubernetes_cluster_name }}
cluster_project={}
cluster_network={}
pod_subnets={{ params.pod_subnets }}
ip_fabric_subnets={{ params.ip_fabric_subnets }}
service_subnets={{ params.service_subnets }}
ip_fabric_forwarding={{ params.ip_fabric_forwarding|pybool }}
ip_fabric_snat={{ params.ip_fabric_snat|pybool }}
host_network_service={{ params.host_network_service|pybool }}

[VNC]
public_fip_pool={{ params.public_fip_pool }}
vnc_endpoint_ip={{ deps.config.addresses|join(',') }}
vnc_endpoint_port={{ deps.config.port }}
rabbit_server={{ deps.rabbitmq.addresses|join(',') }}
rabbit_port={{ deps.rabbitmq.port }}
rabbit_vhost={{ creds.vhost|required }}
rabbit_user={{ creds.user|required }}
rabbit_password={{ creds.password|required }}
rabbit_use_ssl=True
kombu_ssl_keyfile={{ cert_dir }}/server-key-{{ instance.address }}.pem
kombu_ssl_certfile={{ cert_dir }}/server-{{ instance.address }}.crt
kombu_ssl_ca_certs={{ ca_file }}
kombu_ssl_version=tlsv1_2
rabbit_health_check_interval=10
cassandra_server_list={{ deps.cassandra.endpoints|join(' ') }}
cassandra_use_ssl=true
cassandra_ca_certs={{ ca_file }}
collectors={{ deps.config.port_endpoints.collector|join(' ') }}
zk_server_ip={{ deps.zookeeper.endpoints|join(',') }}

[SANDESH]
introspect_ssl_enable=True
sandesh_ssl_enable=True
sandesh_keyfile={{ cert_dir }}/server-key-{{ instance.address }}.pem
sandesh_certfile={{ cert_dir }}/server-{{ instance.address }}.crt
sandesh_ca_cert={{ ca_file }}
"#;

const VNC_API_LIB: &str = r#"[global]
WEB_SERVER = {{ deps.config.addresses|join(',') }}
WEB_PORT = {{ deps.config.port }}
BASE_URL = /
use_ssl = True
cafile = {{ ca_file }}

[auth]
AUTHN_TYPE = noauth
"#;

/// Mounted token of the pod's service account
const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

impl ServiceStrategy for Kubemanager {
    const KIND: ServiceKind = ServiceKind::Kubemanager;
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
        let mut data = ConfigData::new();
        render_per_instance(&mut data, ctx, templates, ROLES, &self.parameters())?;
        Ok(data)
    }

    fn containers(&self) -> Vec<ContainerSpec> {
        let command = format!(
            "export KUBE_TOKEN=$(cat {TOKEN_PATH}) && mkdir -p /etc/contrail && envsubst '${{KUBE_TOKEN}}' < /etc/contrailconfigmaps/kubemanager.${{POD_IP}} > /etc/contrail/contrail-kubernetes.conf && ln -sf /etc/contrailconfigmaps/vnc.${{POD_IP}} /etc/contrail/vnc_api_lib.ini && exec /usr/bin/contrail-kube-manager -c /etc/contrail/contrail-kubernetes.conf"
        );
        vec![ContainerSpec {
            command: vec!["bash".to_string(), "-c".to_string(), command],
            ..ContainerSpec::new("kubemanager", "contrail-kubernetes-kube-manager", &[])
        }]
    }

    fn access(&self) -> Option<AccessGrant> {
        let params = self.parameters();
        let read = ["get", "list", "watch"];
        let write = ["get", "list", "watch", "patch", "update"];
        Some(AccessGrant {
            service_account: params.service_account,
            cluster_role: params.cluster_role,
            cluster_role_binding: params.cluster_role_binding,
            rules: vec![
                rule("", &["pods", "services", "namespaces"], &write),
                rule("", &["endpoints", "nodes"], &read),
                rule("networking.k8s.io", &["networkpolicies", "ingresses"], &read),
                rule("networking.k8s.io", &["ingresses/status"], &["update"]),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KubemanagerSpec;
    use crate::strategy::testing::*;

    fn creds() -> crate::render::Credentials {
        credentials(&[("user", "fabric"), ("password", "s3cret"), ("vhost", "/")])
    }

    fn bridge(spec: KubemanagerSpec) -> Kubemanager {
        let mut km = Kubemanager::new("km1", spec);
        km.metadata.namespace = Some("tf".to_string());
        km
    }

    #[test]
    fn renders_bridge_and_api_client_files_per_instance() {
        let ctx = context("km1", &["10.0.6.1"], &full_dependencies(), &creds());

        let data = bridge(KubemanagerSpec::default())
            .render(&ctx, &engine())
            .unwrap();

        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["kubemanager.10.0.6.1", "vnc.10.0.6.1"]);
        let conf = &data["kubemanager.10.0.6.1"];
        assert!(conf.contains("host_ip=10.0.6.1"));
        assert!(conf.contains("token=${KUBE_TOKEN}"));
        assert!(conf.contains("kubernetes_api_server=kubernetes.default.svc"));
        assert!(conf.contains("kubernetes_api_secure_port=443"));
        assert!(conf.contains("ip_fabric_snat=True"));
        assert!(conf.contains("ip_fabric_forwarding=False"));
        assert!(conf.contains("cassandra_server_list=10.0.1.1:9160 10.0.1.2:9160"));
        assert!(conf.contains("zk_server_ip=10.0.2.1:2181,10.0.2.2:2181"));
        assert!(conf.contains("rabbit_server=10.0.3.1,10.0.3.2"));
        assert!(conf.contains("vnc_endpoint_ip=10.0.4.1,10.0.4.2"));
        assert!(conf.contains("rabbit_user=fabric"));
        assert!(data["vnc.10.0.6.1"].contains("WEB_PORT = 8082"));
    }

    #[test]
    fn missing_broker_credentials_fail_the_render() {
        let ctx = context("km1", &["10.0.6.1"], &full_dependencies(), &credentials(&[]));

        let result = bridge(KubemanagerSpec::default()).render(&ctx, &engine());

        assert!(matches!(result, Err(Error::Render(_))));
    }

    #[test]
    fn cluster_overrides_reach_the_file() {
        let mut spec = KubemanagerSpec::default();
        spec.service_configuration.kubernetes_api_server = Some("10.96.0.1".to_string());
        spec.service_configuration.pod_subnets = Some("172.16.0.0/16".to_string());
        spec.service_configuration.ip_fabric_forwarding = Some(true);
        let ctx = context("km1", &["10.0.6.1"], &full_dependencies(), &creds());

        let data = bridge(spec).render(&ctx, &engine()).unwrap();

        let conf = &data["kubemanager.10.0.6.1"];
        assert!(conf.contains("kubernetes_api_server=10.96.0.1"));
        assert!(conf.contains("pod_subnets=172.16.0.0/16"));
        assert!(conf.contains("ip_fabric_forwarding=True"));
    }

    #[test]
    fn runs_under_a_dedicated_service_account() {
        let grant = bridge(KubemanagerSpec::default()).access().unwrap();

        assert_eq!(grant.service_account, "km1-kubemanager");
        assert_eq!(grant.cluster_role_binding, "fabric-kubemanager-tf-km1");
        assert!(grant.rules.iter().any(|r| r
            .resources
            .as_ref()
            .is_some_and(|res| res.iter().any(|x| x == "pods"))));
    }

    #[test]
    fn token_is_substituted_at_start_not_rendered() {
        let containers = bridge(KubemanagerSpec::default()).containers();
        let script = containers[0].command.last().unwrap();
        assert!(script.contains(TOKEN_PATH));
        assert!(script.contains("envsubst '${KUBE_TOKEN}'"));
    }

    #[test]
    fn depends_on_every_backing_tier() {
        let km = bridge(KubemanagerSpec::default());
        assert_eq!(km.dependencies().len(), 4);
        assert!(km.dependencies().iter().all(|d| d.required));
    }
}
