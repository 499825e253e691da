//! Small helpers shared by the controller, workload and PKI code

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::crd::{ServiceKind, LABEL_INSTANCE, LABEL_KIND};

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "fabric-operator";

/// Labels attached to every object derived from one intent
pub fn instance_labels(kind: ServiceKind, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_KIND.to_string(), kind.as_str().to_string()),
        (LABEL_INSTANCE.to_string(), instance.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Metadata for an object owned by an intent
pub fn owned_meta(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

/// Read a secret value as UTF-8, treating empty values as absent
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok());
    let from_string_data = || {
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
    };
    from_data
        .or_else(from_string_data)
        .filter(|v| !v.is_empty())
}

/// Patch the status sub-resource of a namespaced resource
///
/// Wraps `status` into `{ "status": <status> }` and applies it via
/// merge-patch. Fields to clear must be present as `null`.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
) -> Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Compute a compact deterministic hash of `input`
///
/// First 8 bytes of SHA-256 as 16 lowercase hex characters. Stable across
/// processes and releases, so it is safe to persist in annotations.
pub fn deterministic_hash(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(input.as_bytes());
    hash[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn hash_is_stable_and_compact() {
        let a = deterministic_hash("zoo.servers=10.0.0.1");
        assert_eq!(a, deterministic_hash("zoo.servers=10.0.0.1"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, deterministic_hash("zoo.servers=10.0.0.2"));
    }

    #[test]
    fn secret_values_prefer_data_and_skip_empty() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("user".to_string(), ByteString(b"admin".to_vec())),
                ("password".to_string(), ByteString(Vec::new())),
            ])),
            ..Default::default()
        };
        assert_eq!(secret_string(&secret, "user").as_deref(), Some("admin"));
        assert_eq!(secret_string(&secret, "password"), None);
        assert_eq!(secret_string(&secret, "vhost"), None);
    }

    #[test]
    fn labels_identify_kind_and_instance() {
        let labels = instance_labels(ServiceKind::Rabbitmq, "rmq1");
        assert_eq!(labels.get(LABEL_KIND).map(String::as_str), Some("rabbitmq"));
        assert_eq!(labels.get(LABEL_INSTANCE).map(String::as_str), Some("rmq1"));
    }
}
