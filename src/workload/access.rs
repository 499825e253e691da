//! Kubernetes API access for kinds whose pods call the API
//!
//! A grant is a namespaced service account plus a cluster role bound to
//! it. All three objects are create-only, like the fronting service.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::info;

use crate::controller::KubeClient;
use crate::crd::ServiceKind;
use crate::kube_utils::{instance_labels, owned_meta};
use crate::Error;

/// API access requested by one intent
#[derive(Clone, Debug, PartialEq)]
pub struct AccessGrant {
    /// Service account the pods run as
    pub service_account: String,
    /// Cluster role carrying the rules
    pub cluster_role: String,
    /// Binding of the role to the service account
    pub cluster_role_binding: String,
    /// Rules of the cluster role
    pub rules: Vec<PolicyRule>,
}

/// `verbs` on `resources` of one API group
pub fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
        verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
        ..Default::default()
    }
}

/// The three objects realizing a grant
#[derive(Clone, Debug, PartialEq)]
pub struct AccessObjects {
    /// Namespaced, owned by the intent
    pub service_account: ServiceAccount,
    /// Cluster-scoped
    pub cluster_role: ClusterRole,
    /// Cluster-scoped
    pub cluster_role_binding: ClusterRoleBinding,
}

impl AccessGrant {
    /// Compile the objects for an intent of `kind`
    ///
    /// Cluster-scoped objects cannot be owned by a namespaced intent; they
    /// carry the intent labels instead.
    pub fn compile(
        &self,
        kind: ServiceKind,
        name: &str,
        namespace: &str,
        owner: Option<OwnerReference>,
    ) -> AccessObjects {
        let labels = instance_labels(kind, name);
        let cluster_meta = |object_name: &str| ObjectMeta {
            name: Some(object_name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        };
        AccessObjects {
            service_account: ServiceAccount {
                metadata: owned_meta(&self.service_account, namespace, labels.clone(), owner),
                ..Default::default()
            },
            cluster_role: ClusterRole {
                metadata: cluster_meta(&self.cluster_role),
                rules: Some(self.rules.clone()),
                ..Default::default()
            },
            cluster_role_binding: ClusterRoleBinding {
                metadata: cluster_meta(&self.cluster_role_binding),
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: self.cluster_role.clone(),
                },
                subjects: Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: self.service_account.clone(),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                }]),
            },
        }
    }
}

/// Create whichever access objects are missing
pub async fn ensure_access(
    kube: &dyn KubeClient,
    namespace: &str,
    objects: &AccessObjects,
) -> Result<(), Error> {
    let account = objects.service_account.metadata.name.clone().unwrap_or_default();
    if kube.get_service_account(namespace, &account).await?.is_none() {
        create_once(kube.create_service_account(namespace, &objects.service_account).await)?;
        info!(service_account = %account, "created service account");
    }

    let role = objects.cluster_role.metadata.name.clone().unwrap_or_default();
    if kube.get_cluster_role(&role).await?.is_none() {
        create_once(kube.create_cluster_role(&objects.cluster_role).await)?;
        info!(cluster_role = %role, "created cluster role");
    }

    let binding = objects
        .cluster_role_binding
        .metadata
        .name
        .clone()
        .unwrap_or_default();
    if kube.get_cluster_role_binding(&binding).await?.is_none() {
        create_once(kube.create_cluster_role_binding(&objects.cluster_role_binding).await)?;
        info!(cluster_role_binding = %binding, "created cluster role binding");
    }
    Ok(())
}

/// A concurrent creation by someone else counts as success
fn create_once(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(Error::Conflict(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;

    fn grant() -> AccessGrant {
        AccessGrant {
            service_account: "km1-kubemanager".to_string(),
            cluster_role: "fabric-kubemanager".to_string(),
            cluster_role_binding: "fabric-kubemanager-tf-km1".to_string(),
            rules: vec![rule("", &["pods"], &["get", "list", "watch"])],
        }
    }

    #[test]
    fn binding_ties_the_role_to_the_namespaced_account() {
        let objects = grant().compile(ServiceKind::Kubemanager, "km1", "tf", None);

        let binding = &objects.cluster_role_binding;
        assert_eq!(binding.role_ref.name, "fabric-kubemanager");
        let subject = &binding.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.name, "km1-kubemanager");
        assert_eq!(subject.namespace.as_deref(), Some("tf"));
        assert_eq!(objects.service_account.metadata.namespace.as_deref(), Some("tf"));
        assert_eq!(objects.cluster_role.metadata.namespace, None);
        assert_eq!(objects.cluster_role.rules.as_ref().unwrap().len(), 1);
    }

    // =========================================================================
    // Story: Access objects are created once and never rewritten
    // =========================================================================

    #[tokio::test]
    async fn missing_objects_are_created() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service_account().returning(|_, _| Ok(None));
        kube.expect_get_cluster_role().returning(|_| Ok(None));
        kube.expect_get_cluster_role_binding().returning(|_| Ok(None));
        kube.expect_create_service_account()
            .withf(|ns, sa| ns == "tf" && sa.metadata.name.as_deref() == Some("km1-kubemanager"))
            .times(1)
            .returning(|_, _| Ok(()));
        kube.expect_create_cluster_role()
            .times(1)
            .returning(|_| Err(Error::conflict("ClusterRole fabric-kubemanager")));
        kube.expect_create_cluster_role_binding()
            .times(1)
            .returning(|_| Ok(()));

        let objects = grant().compile(ServiceKind::Kubemanager, "km1", "tf", None);
        ensure_access(&kube, "tf", &objects).await.unwrap();
    }

    #[tokio::test]
    async fn existing_objects_are_left_alone() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_service_account()
            .returning(|_, _| Ok(Some(ServiceAccount::default())));
        kube.expect_get_cluster_role()
            .returning(|_| Ok(Some(ClusterRole::default())));
        kube.expect_get_cluster_role_binding()
            .returning(|_| Ok(Some(ClusterRoleBinding::default())));
        kube.expect_create_service_account().never();
        kube.expect_create_cluster_role().never();
        kube.expect_create_cluster_role_binding().never();

        let objects = grant().compile(ServiceKind::Kubemanager, "km1", "tf", None);
        ensure_access(&kube, "tf", &objects).await.unwrap();
    }
}
