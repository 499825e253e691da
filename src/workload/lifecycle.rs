//! Workload create-or-update

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

use super::{
    OwnedFields, UpdateStrategy, Workload, WorkloadOutcome, CONFIG_HASH_ANNOTATION,
    RESTARTED_AT_ANNOTATION,
};
use crate::controller::KubeClient;
use crate::Error;

/// Ensure the workload matches `desired` on every operator-owned field
///
/// Returns the outcome together with the workload as it now stands (the
/// observed object when unchanged or terminating, the written one otherwise).
/// `rollout` annotations ride along with an in-place replace so a rolling
/// update and a configuration rollout cost one write.
pub async fn ensure_workload(
    kube: &dyn KubeClient,
    namespace: &str,
    desired: Workload,
    strategy: UpdateStrategy,
    rollout: Option<&BTreeMap<String, String>>,
) -> Result<(WorkloadOutcome, Workload), Error> {
    let name = desired.name();
    let kind = desired.kind();

    let Some(existing) = kube.get_workload(kind, namespace, &name).await? else {
        kube.create_workload(namespace, &desired).await?;
        info!(workload = %name, ?kind, "created workload");
        return Ok((WorkloadOutcome::Created, desired));
    };

    if existing.is_terminating() {
        debug!(workload = %name, "workload deletion still in progress");
        return Ok((WorkloadOutcome::Terminating, existing));
    }

    if OwnedFields::of(&existing) == OwnedFields::of(&desired) {
        return Ok((WorkloadOutcome::Unchanged, existing));
    }

    match strategy {
        UpdateStrategy::Rolling => {
            let mut merged = OwnedFields::merge(&existing, &desired);
            if let (Some(annotations), Some(template)) = (rollout, merged.pod_template_mut()) {
                template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .extend(annotations.clone());
            }
            kube.replace_workload(namespace, &merged).await?;
            info!(workload = %name, "replaced workload owned fields");
            Ok((WorkloadOutcome::Updated, merged))
        }
        UpdateStrategy::DeleteFirst => {
            kube.delete_workload(kind, namespace, &name).await?;
            info!(workload = %name, "deleted workload for recreation");
            Ok((WorkloadOutcome::Updated, existing))
        }
    }
}

/// Pod-template annotations that roll every pod onto a new configuration
pub fn rollout_annotations(config_hash: &str, now: DateTime<Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CONFIG_HASH_ANNOTATION.to_string(), config_hash.to_string()),
        (
            RESTARTED_AT_ANNOTATION.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ])
}

/// Ensure the ClusterIP service fronting an intent exists
///
/// Create-only: an existing service is left as it is. Returns its cluster
/// IP once the platform has assigned one.
pub async fn ensure_service(
    kube: &dyn KubeClient,
    namespace: &str,
    desired: &Service,
) -> Result<Option<String>, Error> {
    let name = desired.metadata.name.clone().unwrap_or_default();

    let service = match kube.get_service(namespace, &name).await? {
        Some(existing) => existing,
        None => {
            let created = kube.create_service(namespace, desired).await?;
            info!(service = %name, "created service");
            created
        }
    };

    Ok(service
        .spec
        .and_then(|s| s.cluster_ip)
        .filter(|ip| !ip.is_empty() && ip != "None"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::crd::{CommonConfiguration, ServiceKind};
    use crate::workload::{ContainerSpec, ImageSettings, WorkloadCompiler, WorkloadInput, WorkloadKind};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn desired(replicas: i32) -> Workload {
        let common = CommonConfiguration {
            replicas: Some(replicas),
            ..Default::default()
        };
        let images = ImageSettings::default();
        WorkloadCompiler::compile(&WorkloadInput {
            kind: ServiceKind::Zookeeper,
            workload_kind: WorkloadKind::StatefulSet,
            name: "zk1",
            namespace: "tf",
            owner: None,
            common: &common,
            host_network: false,
            containers: vec![ContainerSpec::new("zookeeper", "contrail-external-zookeeper", &[])],
            config_hash: "h1",
            images: &images,
            service_account: None,
        })
    }

    // =========================================================================
    // Story: Absent workloads are created from the full desired object
    // =========================================================================

    #[tokio::test]
    async fn absent_workload_is_created() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload().returning(|_, _, _| Ok(None));
        kube.expect_create_workload()
            .withf(|ns, w| ns == "tf" && w.name() == "zk1-zookeeper-statefulset")
            .times(1)
            .returning(|_, _| Ok(()));

        let (outcome, _) = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::DeleteFirst, None)
            .await
            .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Created);
    }

    // =========================================================================
    // Story: Converged workloads are never written
    // =========================================================================

    #[tokio::test]
    async fn matching_workload_is_left_alone() {
        let observed = desired(3);
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_create_workload().never();
        kube.expect_replace_workload().never();
        kube.expect_delete_workload().never();

        let (outcome, _) = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::Rolling, None)
            .await
            .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Unchanged);
    }

    // =========================================================================
    // Story: Owned-field changes follow the kind's update strategy
    // =========================================================================

    #[tokio::test]
    async fn rolling_strategy_replaces_in_place() {
        let observed = desired(1);
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_replace_workload()
            .withf(|_, w| w.replicas() == Some(3))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_delete_workload().never();

        let (outcome, _) = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::Rolling, None)
            .await
            .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Updated);
    }

    #[tokio::test]
    async fn rolling_replace_carries_the_rollout_annotations() {
        let observed = desired(1);
        let rollout = rollout_annotations("h2", Utc::now());
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_replace_workload()
            .withf(|_, w| {
                w.replicas() == Some(3)
                    && w.applied_config_hash() == Some("h2")
                    && w.template_annotation(RESTARTED_AT_ANNOTATION).is_some()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_annotate_pod_template().never();

        let (outcome, written) =
            ensure_workload(&kube, "tf", desired(3), UpdateStrategy::Rolling, Some(&rollout))
                .await
                .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Updated);
        assert_eq!(written.applied_config_hash(), Some("h2"));
    }

    #[tokio::test]
    async fn delete_first_strategy_deletes_for_recreation() {
        let observed = desired(1);
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_delete_workload()
            .withf(|kind, _, name| {
                *kind == WorkloadKind::StatefulSet && name == "zk1-zookeeper-statefulset"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        kube.expect_replace_workload().never();

        let (outcome, _) = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::DeleteFirst, None)
            .await
            .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Updated);
    }

    #[tokio::test]
    async fn terminating_workload_waits_for_deletion() {
        let mut observed = desired(1);
        if let Workload::StatefulSet(sts) = &mut observed {
            sts.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_create_workload().never();

        let (outcome, _) = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::DeleteFirst, None)
            .await
            .unwrap();

        assert_eq!(outcome, WorkloadOutcome::Terminating);
    }

    #[tokio::test]
    async fn conflicting_replace_surfaces_as_conflict() {
        let observed = desired(1);
        let mut kube = MockKubeClient::new();
        kube.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(observed.clone())));
        kube.expect_replace_workload()
            .returning(|_, _| Err(Error::conflict("StatefulSet tf/zk1-zookeeper-statefulset")));

        let result = ensure_workload(&kube, "tf", desired(3), UpdateStrategy::Rolling, None).await;

        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn rollout_annotations_carry_hash_and_timestamp() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let annotations = rollout_annotations("abcd", now);
        assert_eq!(annotations[CONFIG_HASH_ANNOTATION], "abcd");
        assert_eq!(annotations[RESTARTED_AT_ANNOTATION], "2024-05-01T10:00:00Z");
    }

    // =========================================================================
    // Story: The fronting service is created once and its cluster IP reported
    // =========================================================================

    fn service(cluster_ip: Option<&str>) -> Service {
        let mut service = WorkloadCompiler::compile_service(
            ServiceKind::Config,
            "cfg1",
            "tf",
            None,
            &[("api", 8082)],
        );
        if let Some(spec) = service.spec.as_mut() {
            spec.cluster_ip = cluster_ip.map(str::to_string);
        }
        service
    }

    #[tokio::test]
    async fn absent_service_is_created_and_its_ip_returned() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service().returning(|_, _| Ok(None));
        kube.expect_create_service()
            .withf(|ns, s| ns == "tf" && s.metadata.name.as_deref() == Some("cfg1-config"))
            .times(1)
            .returning(|_, _| Ok(service(Some("10.96.0.20"))));

        let endpoint = ensure_service(&kube, "tf", &service(None)).await.unwrap();

        assert_eq!(endpoint.as_deref(), Some("10.96.0.20"));
    }

    #[tokio::test]
    async fn existing_service_is_not_rewritten() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service()
            .returning(|_, _| Ok(Some(service(Some("10.96.0.21")))));
        kube.expect_create_service().never();

        let endpoint = ensure_service(&kube, "tf", &service(None)).await.unwrap();

        assert_eq!(endpoint.as_deref(), Some("10.96.0.21"));
    }

    #[tokio::test]
    async fn headless_service_has_no_endpoint() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service()
            .returning(|_, _| Ok(Some(service(Some("None")))));

        assert_eq!(ensure_service(&kube, "tf", &service(None)).await.unwrap(), None);
    }
}
