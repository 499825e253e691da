//! Kubernetes access for the reconcile engine
//!
//! Every read and write the engine performs goes through [`KubeClient`], so
//! reconcile passes can be exercised against a mock in unit tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    AnalyticsSnmp, Cassandra, Config, Kubemanager, Rabbitmq, ServiceKind, Vrouter, Webui,
    Zookeeper,
};
use crate::kube_utils::{patch_resource_status, FIELD_MANAGER};
use crate::status::StatusPatch;
use crate::workload::{Workload, WorkloadKind};
use crate::Error;

/// Trait abstracting Kubernetes client operations used by the engine
///
/// Methods are concrete per object type rather than generic so the trait
/// stays object-safe and mockable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// List Cassandra intents in a namespace
    async fn list_cassandras(&self, namespace: &str) -> Result<Vec<Cassandra>, Error>;

    /// List Zookeeper intents in a namespace
    async fn list_zookeepers(&self, namespace: &str) -> Result<Vec<Zookeeper>, Error>;

    /// List Rabbitmq intents in a namespace
    async fn list_rabbitmqs(&self, namespace: &str) -> Result<Vec<Rabbitmq>, Error>;

    /// List Config intents in a namespace
    async fn list_configs(&self, namespace: &str) -> Result<Vec<Config>, Error>;

    /// Get a secret (None if absent)
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret, failing with `Conflict` if it already exists
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Server-side apply a secret
    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Get a config map (None if absent)
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a config map
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<(), Error>;

    /// Replace a config map, guarded by its `resourceVersion`
    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error>;

    /// Server-side apply a config map
    async fn apply_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<(), Error>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Merge the given labels into a pod's metadata
    async fn label_pod(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Get a workload (None if absent)
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error>;

    /// Create a workload
    async fn create_workload(&self, namespace: &str, workload: &Workload) -> Result<(), Error>;

    /// Replace a workload, guarded by its `resourceVersion`
    async fn replace_workload(&self, namespace: &str, workload: &Workload) -> Result<(), Error>;

    /// Delete a workload (absent counts as deleted)
    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Merge the given annotations into a workload's pod template
    async fn annotate_pod_template(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Get a service (None if absent)
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create a service and return it as stored
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Get a service account (None if absent)
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// Create a service account
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error>;

    /// Get a cluster role (None if absent)
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error>;

    /// Create a cluster role
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Get a cluster role binding (None if absent)
    async fn get_cluster_role_binding(&self, name: &str)
        -> Result<Option<ClusterRoleBinding>, Error>;

    /// Create a cluster role binding
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding)
        -> Result<(), Error>;

    /// Patch the status subresource of an intent
    async fn patch_status(
        &self,
        kind: ServiceKind,
        namespace: &str,
        name: &str,
        patch: &StatusPatch,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_cassandras(&self, namespace: &str) -> Result<Vec<Cassandra>, Error> {
        Ok(self.api::<Cassandra>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_zookeepers(&self, namespace: &str) -> Result<Vec<Zookeeper>, Error> {
        Ok(self.api::<Zookeeper>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_rabbitmqs(&self, namespace: &str) -> Result<Vec<Rabbitmq>, Error> {
        Ok(self.api::<Rabbitmq>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_configs(&self, namespace: &str) -> Result<Vec<Config>, Error> {
        Ok(self.api::<Config>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let what = format!("Secret {namespace}/{}", secret.metadata.name.as_deref().unwrap_or(""));
        self.api::<Secret>(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Certificate))?;
        Ok(())
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.api::<Secret>(namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await
            .map_err(|e| Error::from_write(e, &format!("Secret {namespace}/{name}"), Error::Certificate))?;
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.api::<ConfigMap>(namespace).get_opt(name).await?)
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error> {
        let what = format!(
            "ConfigMap {namespace}/{}",
            config_map.metadata.name.as_deref().unwrap_or("")
        );
        self.api::<ConfigMap>(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Lifecycle))?;
        Ok(())
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.api::<ConfigMap>(namespace)
            .replace(&name, &PostParams::default(), config_map)
            .await
            .map_err(|e| {
                Error::from_write(e, &format!("ConfigMap {namespace}/{name}"), Error::Lifecycle)
            })?;
        Ok(())
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), Error> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.api::<ConfigMap>(namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(config_map),
            )
            .await
            .map_err(|e| {
                Error::from_write(e, &format!("ConfigMap {namespace}/{name}"), Error::Certificate)
            })?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        Ok(self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(selector))
            .await?
            .items)
    }

    async fn label_pod(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        self.api::<Pod>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_write(e, &format!("Pod {namespace}/{name}"), Error::Lifecycle))?;
        Ok(())
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, Error> {
        Ok(match kind {
            WorkloadKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .get_opt(name)
                .await?
                .map(Workload::StatefulSet),
            WorkloadKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .get_opt(name)
                .await?
                .map(Workload::DaemonSet),
        })
    }

    async fn create_workload(&self, namespace: &str, workload: &Workload) -> Result<(), Error> {
        let what = format!("{:?} {namespace}/{}", workload.kind(), workload.name());
        let pp = PostParams::default();
        let result = match workload {
            Workload::StatefulSet(sts) => self
                .api::<StatefulSet>(namespace)
                .create(&pp, sts)
                .await
                .map(|_| ()),
            Workload::DaemonSet(ds) => self
                .api::<DaemonSet>(namespace)
                .create(&pp, ds)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| Error::from_write(e, &what, Error::Lifecycle))
    }

    async fn replace_workload(&self, namespace: &str, workload: &Workload) -> Result<(), Error> {
        let name = workload.name();
        let what = format!("{:?} {namespace}/{name}", workload.kind());
        let pp = PostParams::default();
        let result = match workload {
            Workload::StatefulSet(sts) => self
                .api::<StatefulSet>(namespace)
                .replace(&name, &pp, sts)
                .await
                .map(|_| ()),
            Workload::DaemonSet(ds) => self
                .api::<DaemonSet>(namespace)
                .replace(&name, &pp, ds)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| Error::from_write(e, &what, Error::Lifecycle))
    }

    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let dp = DeleteParams::background();
        let result = match kind {
            WorkloadKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            WorkloadKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from_write(
                e,
                &format!("{kind:?} {namespace}/{name}"),
                Error::Lifecycle,
            )),
        }
    }

    async fn annotate_pod_template(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": annotations } } }
        });
        let pp = PatchParams::default();
        let result = match kind {
            WorkloadKind::StatefulSet => self
                .api::<StatefulSet>(namespace)
                .patch(name, &pp, &Patch::Merge(&patch))
                .await
                .map(|_| ()),
            WorkloadKind::DaemonSet => self
                .api::<DaemonSet>(namespace)
                .patch(name, &pp, &Patch::Merge(&patch))
                .await
                .map(|_| ()),
        };
        result.map_err(|e| {
            Error::from_write(e, &format!("{kind:?} {namespace}/{name}"), Error::Lifecycle)
        })
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.api::<Service>(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let what = format!(
            "Service {namespace}/{}",
            service.metadata.name.as_deref().unwrap_or("")
        );
        self.api::<Service>(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Lifecycle))
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        Ok(self.api::<ServiceAccount>(namespace).get_opt(name).await?)
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error> {
        let what = format!(
            "ServiceAccount {namespace}/{}",
            account.metadata.name.as_deref().unwrap_or("")
        );
        self.api::<ServiceAccount>(namespace)
            .create(&PostParams::default(), account)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Lifecycle))?;
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error> {
        Ok(Api::<ClusterRole>::all(self.client.clone()).get_opt(name).await?)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        let what = format!("ClusterRole {}", role.metadata.name.as_deref().unwrap_or(""));
        Api::<ClusterRole>::all(self.client.clone())
            .create(&PostParams::default(), role)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Lifecycle))?;
        Ok(())
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, Error> {
        Ok(Api::<ClusterRoleBinding>::all(self.client.clone())
            .get_opt(name)
            .await?)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        let what = format!(
            "ClusterRoleBinding {}",
            binding.metadata.name.as_deref().unwrap_or("")
        );
        Api::<ClusterRoleBinding>::all(self.client.clone())
            .create(&PostParams::default(), binding)
            .await
            .map_err(|e| Error::from_write(e, &what, Error::Lifecycle))?;
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: ServiceKind,
        namespace: &str,
        name: &str,
        patch: &StatusPatch,
    ) -> Result<(), Error> {
        let client = &self.client;
        let status = &patch.to_merge_patch();
        match kind {
            ServiceKind::Cassandra => {
                patch_resource_status::<Cassandra>(client, name, namespace, status).await?
            }
            ServiceKind::Zookeeper => {
                patch_resource_status::<Zookeeper>(client, name, namespace, status).await?
            }
            ServiceKind::Rabbitmq => {
                patch_resource_status::<Rabbitmq>(client, name, namespace, status).await?
            }
            ServiceKind::Config => {
                patch_resource_status::<Config>(client, name, namespace, status).await?
            }
            ServiceKind::AnalyticsSnmp => {
                patch_resource_status::<AnalyticsSnmp>(client, name, namespace, status).await?
            }
            ServiceKind::Webui => {
                patch_resource_status::<Webui>(client, name, namespace, status).await?
            }
            ServiceKind::Vrouter => {
                patch_resource_status::<Vrouter>(client, name, namespace, status).await?
            }
            ServiceKind::Kubemanager => {
                patch_resource_status::<Kubemanager>(client, name, namespace, status).await?
            }
        }
        Ok(())
    }
}
