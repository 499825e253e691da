//! Operator-owned workload fields
//!
//! Only a projection of the workload is compared and overwritten. Everything
//! else (server defaults, fields other controllers maintain, the pod-template
//! annotations that carry the rollout state) is left as observed.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec, Toleration};

use super::Workload;

/// Volume identity: name plus the object it projects
#[derive(Clone, Debug, PartialEq, Eq)]
struct VolumeRef {
    name: String,
    source: Option<String>,
}

/// Container identity: the fields a user can override
#[derive(Clone, Debug, PartialEq, Eq)]
struct ContainerRef {
    name: String,
    image: Option<String>,
    command: Vec<String>,
}

/// The fields the operator owns on a workload
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedFields {
    replicas: Option<i32>,
    init_containers: Vec<ContainerRef>,
    containers: Vec<ContainerRef>,
    volumes: Vec<VolumeRef>,
    node_selector: BTreeMap<String, String>,
    tolerations: Vec<Toleration>,
    host_network: bool,
    image_pull_secrets: Vec<LocalObjectReference>,
    service_account: Option<String>,
}

impl OwnedFields {
    /// Project the owned fields of a workload
    pub fn of(workload: &Workload) -> Self {
        let spec = workload.pod_template().and_then(|t| t.spec.as_ref());
        Self {
            replicas: workload.replicas(),
            init_containers: spec
                .and_then(|s| s.init_containers.as_deref())
                .map(container_refs)
                .unwrap_or_default(),
            containers: spec
                .map(|s| container_refs(&s.containers))
                .unwrap_or_default(),
            volumes: spec
                .and_then(|s| s.volumes.as_ref())
                .map(|volumes| {
                    volumes
                        .iter()
                        .map(|v| VolumeRef {
                            name: v.name.clone(),
                            source: v
                                .config_map
                                .as_ref()
                                .and_then(|cm| Option::<String>::from(cm.name.clone()))
                                .or_else(|| v.secret.as_ref().and_then(|s| s.secret_name.clone())),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            node_selector: spec
                .and_then(|s| s.node_selector.clone())
                .unwrap_or_default(),
            tolerations: spec.and_then(|s| s.tolerations.clone()).unwrap_or_default(),
            host_network: spec.and_then(|s| s.host_network).unwrap_or(false),
            image_pull_secrets: spec
                .and_then(|s| s.image_pull_secrets.clone())
                .unwrap_or_default(),
            service_account: spec.and_then(|s| s.service_account_name.clone()),
        }
    }

    /// Copy the owned fields of `desired` onto `existing`
    ///
    /// Keeps the existing metadata (including `resourceVersion` for optimistic
    /// concurrency) and the existing pod-template annotations.
    pub fn merge(existing: &Workload, desired: &Workload) -> Workload {
        let mut merged = existing.clone();

        if let (Workload::StatefulSet(merged), Workload::StatefulSet(desired)) =
            (&mut merged, desired)
        {
            if let (Some(spec), Some(want)) = (merged.spec.as_mut(), desired.spec.as_ref()) {
                spec.replicas = want.replicas;
            }
        }

        let desired_spec = desired.pod_template().and_then(|t| t.spec.clone());
        let desired_labels = desired
            .pod_template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.clone());

        if let Some(template) = merged.pod_template_mut() {
            if let Some(want) = desired_spec {
                let spec = template.spec.get_or_insert_with(PodSpec::default);
                spec.init_containers = want.init_containers;
                spec.containers = want.containers;
                spec.volumes = want.volumes;
                spec.node_selector = want.node_selector;
                spec.tolerations = want.tolerations;
                spec.host_network = want.host_network;
                spec.dns_policy = want.dns_policy;
                spec.image_pull_secrets = want.image_pull_secrets;
                spec.service_account_name = want.service_account_name;
            }
            if let Some(labels) = desired_labels {
                template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(labels);
            }
        }

        merged
    }
}

fn container_refs(containers: &[Container]) -> Vec<ContainerRef> {
    containers
        .iter()
        .map(|c| ContainerRef {
            name: c.name.clone(),
            image: c.image.clone(),
            command: c.command.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CommonConfiguration, ServiceKind};
    use crate::workload::{
        ContainerSpec, ImageSettings, WorkloadCompiler, WorkloadInput, WorkloadKind,
        CONFIG_HASH_ANNOTATION,
    };

    fn compile(common: &CommonConfiguration, hash: &str) -> Workload {
        let images = ImageSettings::default();
        WorkloadCompiler::compile(&WorkloadInput {
            kind: ServiceKind::Rabbitmq,
            workload_kind: WorkloadKind::StatefulSet,
            name: "rmq1",
            namespace: "tf",
            owner: None,
            common,
            host_network: false,
            containers: vec![ContainerSpec::new(
                "rabbitmq",
                "contrail-external-rabbitmq",
                &["bash", "/runner/run.sh"],
            )],
            config_hash: hash,
            images: &images,
            service_account: None,
        })
    }

    #[test]
    fn config_hash_is_not_an_owned_field() {
        let common = CommonConfiguration::default();
        assert_eq!(
            OwnedFields::of(&compile(&common, "aaaa")),
            OwnedFields::of(&compile(&common, "bbbb"))
        );
    }

    #[test]
    fn replica_change_is_detected() {
        let one = CommonConfiguration::default();
        let three = CommonConfiguration {
            replicas: Some(3),
            ..Default::default()
        };
        assert_ne!(
            OwnedFields::of(&compile(&one, "h")),
            OwnedFields::of(&compile(&three, "h"))
        );
    }

    #[test]
    fn merge_applies_owned_fields_and_keeps_observed_annotations() {
        let mut existing = compile(&CommonConfiguration::default(), "observed");
        if let Workload::StatefulSet(sts) = &mut existing {
            sts.metadata.resource_version = Some("42".to_string());
        }
        let desired = compile(
            &CommonConfiguration {
                replicas: Some(3),
                ..Default::default()
            },
            "desired",
        );

        let merged = OwnedFields::merge(&existing, &desired);

        assert_eq!(OwnedFields::of(&merged), OwnedFields::of(&desired));
        assert_eq!(merged.metadata().resource_version.as_deref(), Some("42"));
        assert_eq!(
            merged.template_annotation(CONFIG_HASH_ANNOTATION),
            Some("observed")
        );
    }

    #[test]
    fn workload_without_the_init_gate_is_brought_up_to_date() {
        let desired = compile(&CommonConfiguration::default(), "h");
        let mut existing = desired.clone();
        if let Some(spec) = existing.pod_template_mut().and_then(|t| t.spec.as_mut()) {
            spec.init_containers = None;
        }

        assert_ne!(OwnedFields::of(&existing), OwnedFields::of(&desired));
        let merged = OwnedFields::merge(&existing, &desired);
        assert_eq!(OwnedFields::of(&merged), OwnedFields::of(&desired));
    }
}
