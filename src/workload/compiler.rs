//! Desired workload compilation
//!
//! Builds the full desired StatefulSet/DaemonSet (and the optional fronting
//! Service) for one intent before anything is written.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EnvVar,
    EnvVarSource, LocalObjectReference, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    SecretVolumeSource, SecurityContext, Service, ServicePort, ServiceSpec, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{Workload, WorkloadKind, CONFIG_HASH_ANNOTATION};
use crate::crd::{CommonConfiguration, ServiceKind, LABEL_CONFIG_READY, LABEL_INSTANCE, LABEL_KIND};
use crate::kube_utils::{instance_labels, owned_meta};
use crate::pki::{
    certificates_secret_name, CA_BUNDLE_MOUNT_DIR, CERTIFICATES_MOUNT_DIR, SIGNER_CA_NAME,
};

/// Directory the rendered configuration map is mounted at
pub const CONFIG_MOUNT_DIR: &str = "/etc/contrailconfigmaps";

const CONFIG_VOLUME: &str = "config";
const CERTIFICATES_VOLUME: &str = "certificates";
const SIGNER_CA_VOLUME: &str = "signer-ca";
const PODINFO_VOLUME: &str = "podinfo";
const PODINFO_MOUNT_DIR: &str = "/tmp/podinfo";

/// Name of the init container holding pods until their configuration is stored
pub const READY_GATE_CONTAINER: &str = "init";
/// Default image of the ready gate, overridable through the `init` container entry
pub const READY_GATE_IMAGE: &str = "busybox:1.36";

/// Image registry and tag applied to every default container image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSettings {
    /// Registry prefix, e.g. `docker.io/opencontrailnightly`
    pub registry: String,
    /// Image tag
    pub tag: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            registry: "docker.io/opencontrailnightly".to_string(),
            tag: "latest".to_string(),
        }
    }
}

impl ImageSettings {
    /// Full image reference for a repository
    pub fn image(&self, repository: &str) -> String {
        format!("{}/{}:{}", self.registry, repository, self.tag)
    }
}

/// A container a service kind runs by default
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, also the key for user overrides
    pub name: &'static str,
    /// Repository under the configured registry
    pub image: &'static str,
    /// Default command
    pub command: Vec<String>,
    /// Run privileged (node agent only)
    pub privileged: bool,
}

impl ContainerSpec {
    /// Unprivileged container running `command`
    pub fn new(name: &'static str, image: &'static str, command: &[&str]) -> Self {
        Self {
            name,
            image,
            command: command.iter().map(|c| (*c).to_string()).collect(),
            privileged: false,
        }
    }

    /// Mark the container privileged
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Everything needed to compile the desired workload of one intent
pub struct WorkloadInput<'a> {
    /// Service kind
    pub kind: ServiceKind,
    /// Workload shape
    pub workload_kind: WorkloadKind,
    /// Intent name
    pub name: &'a str,
    /// Intent namespace
    pub namespace: &'a str,
    /// Controller owner reference to the intent
    pub owner: Option<OwnerReference>,
    /// Pod-level configuration from the intent
    pub common: &'a CommonConfiguration,
    /// Whether pods use host networking
    pub host_network: bool,
    /// Default containers of the kind
    pub containers: Vec<ContainerSpec>,
    /// Hash of the configuration being rendered
    pub config_hash: &'a str,
    /// Registry and tag for default images
    pub images: &'a ImageSettings,
    /// Service account the pods run as, when the kind needs API access
    pub service_account: Option<&'a str>,
}

/// Compiles intents into workload resources
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Compile the full desired workload
    pub fn compile(input: &WorkloadInput<'_>) -> Workload {
        let name = input.workload_kind.workload_name(input.kind, input.name);
        let labels = instance_labels(input.kind, input.name);
        let metadata = owned_meta(&name, input.namespace, labels.clone(), input.owner.clone());
        let selector = LabelSelector {
            match_labels: Some(Self::selector_labels(input.kind, input.name)),
            ..Default::default()
        };
        let template = Self::compile_pod_template(input, labels);

        match input.workload_kind {
            WorkloadKind::StatefulSet => Workload::StatefulSet(StatefulSet {
                metadata,
                spec: Some(StatefulSetSpec {
                    replicas: Some(input.common.replicas()),
                    selector,
                    template,
                    ..Default::default()
                }),
                status: None,
            }),
            WorkloadKind::DaemonSet => Workload::DaemonSet(DaemonSet {
                metadata,
                spec: Some(DaemonSetSpec {
                    selector,
                    template,
                    ..Default::default()
                }),
                status: None,
            }),
        }
    }

    /// Compile the ClusterIP service fronting an intent's instances
    pub fn compile_service(
        kind: ServiceKind,
        name: &str,
        namespace: &str,
        owner: Option<OwnerReference>,
        ports: &[(&str, u16)],
    ) -> Service {
        let service_name = format!("{name}-{}", kind.as_str());
        Service {
            metadata: owned_meta(
                &service_name,
                namespace,
                instance_labels(kind, name),
                owner,
            ),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(Self::selector_labels(kind, name)),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port_name, port)| ServicePort {
                            name: Some((*port_name).to_string()),
                            port: i32::from(*port),
                            target_port: Some(IntOrString::Int(i32::from(*port))),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn selector_labels(kind: ServiceKind, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_KIND.to_string(), kind.as_str().to_string()),
            (LABEL_INSTANCE.to_string(), name.to_string()),
        ])
    }

    fn compile_pod_template(
        input: &WorkloadInput<'_>,
        labels: BTreeMap<String, String>,
    ) -> PodTemplateSpec {
        let common = input.common;
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                annotations: Some(BTreeMap::from([(
                    CONFIG_HASH_ANNOTATION.to_string(),
                    input.config_hash.to_string(),
                )])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(vec![Self::compile_ready_gate(input)]),
                containers: Self::compile_containers(input),
                volumes: Some(Self::compile_volumes(input.kind, input.name)),
                node_selector: (!common.node_selector.is_empty())
                    .then(|| common.node_selector.clone()),
                tolerations: (!common.tolerations.is_empty()).then(|| {
                    common
                        .tolerations
                        .iter()
                        .map(|t| Toleration {
                            key: t.key.clone(),
                            operator: t.operator.clone(),
                            value: t.value.clone(),
                            effect: t.effect.clone(),
                            toleration_seconds: None,
                        })
                        .collect()
                }),
                host_network: input.host_network.then_some(true),
                dns_policy: input
                    .host_network
                    .then(|| "ClusterFirstWithHostNet".to_string()),
                image_pull_secrets: (!common.image_pull_secrets.is_empty()).then(|| {
                    common
                        .image_pull_secrets
                        .iter()
                        .map(|name| LocalObjectReference {
                            name: name.clone().into(),
                        })
                        .collect()
                }),
                service_account_name: input.service_account.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    /// Init container that blocks until the pod carries the config-ready label
    ///
    /// The label reaches the pod through a downward API file, so the gate
    /// opens without restarting the pod.
    fn compile_ready_gate(input: &WorkloadInput<'_>) -> Container {
        let user = input.common.container(READY_GATE_CONTAINER);
        let image = user
            .and_then(|c| c.image.clone())
            .unwrap_or_else(|| READY_GATE_IMAGE.to_string());
        let command = user.and_then(|c| c.command.clone()).unwrap_or_else(|| {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "until grep -q '^{LABEL_CONFIG_READY}=\"true\"' {PODINFO_MOUNT_DIR}/pod_labels; do sleep 1; done"
                ),
            ]
        });
        Container {
            name: READY_GATE_CONTAINER.to_string(),
            image: Some(image),
            command: Some(command),
            volume_mounts: Some(vec![mount(PODINFO_VOLUME, PODINFO_MOUNT_DIR)]),
            ..Default::default()
        }
    }

    fn compile_containers(input: &WorkloadInput<'_>) -> Vec<Container> {
        input
            .containers
            .iter()
            .map(|spec| {
                let user = input.common.container(spec.name);
                let image = user
                    .and_then(|c| c.image.clone())
                    .unwrap_or_else(|| input.images.image(spec.image));
                let command = user
                    .and_then(|c| c.command.clone())
                    .unwrap_or_else(|| spec.command.clone());

                Container {
                    name: spec.name.to_string(),
                    image: Some(image),
                    command: (!command.is_empty()).then_some(command),
                    env: Some(vec![
                        field_env("POD_IP", "status.podIP"),
                        field_env("POD_NAME", "metadata.name"),
                        field_env("HOST_IP", "status.hostIP"),
                    ]),
                    volume_mounts: Some(vec![
                        mount(CONFIG_VOLUME, CONFIG_MOUNT_DIR),
                        mount(CERTIFICATES_VOLUME, CERTIFICATES_MOUNT_DIR),
                        mount(SIGNER_CA_VOLUME, CA_BUNDLE_MOUNT_DIR),
                    ]),
                    security_context: spec.privileged.then(|| SecurityContext {
                        privileged: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn compile_volumes(kind: ServiceKind, name: &str) -> Vec<Volume> {
        vec![
            Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: kind.config_map_name(name).into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: CERTIFICATES_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(certificates_secret_name(name)),
                    optional: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: SIGNER_CA_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: SIGNER_CA_NAME.to_string().into(),
                    optional: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: PODINFO_VOLUME.to_string(),
                downward_api: Some(DownwardAPIVolumeSource {
                    items: Some(vec![DownwardAPIVolumeFile {
                        path: "pod_labels".to_string(),
                        field_ref: Some(ObjectFieldSelector {
                            api_version: None,
                            field_path: "metadata.labels".to_string(),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}
