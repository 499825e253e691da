//! Rendered configuration persistence

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info};

use super::ConfigData;
use crate::controller::KubeClient;
use crate::crd::ServiceKind;
use crate::kube_utils::{instance_labels, owned_meta};
use crate::Error;

/// Data of a stored configuration map, if any
pub fn stored_data(config_map: Option<&ConfigMap>) -> Option<ConfigData> {
    config_map.map(|cm| cm.data.clone().unwrap_or_default())
}

/// Whether a write happened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Map created
    Created,
    /// Data replaced
    Replaced,
    /// Stored data already matched
    Unchanged,
}

/// Persist rendered data into the intent's configuration map
///
/// `existing` is the map as read at the start of the pass. Data is replaced
/// in full so keys for departed instances disappear. A write racing another
/// writer fails with `Error::Conflict`.
pub async fn store_config_map(
    kube: &dyn KubeClient,
    kind: ServiceKind,
    name: &str,
    namespace: &str,
    owner: Option<OwnerReference>,
    existing: Option<&ConfigMap>,
    data: &ConfigData,
) -> Result<StoreOutcome, Error> {
    let map_name = kind.config_map_name(name);

    match existing {
        None => {
            let config_map = ConfigMap {
                metadata: owned_meta(&map_name, namespace, instance_labels(kind, name), owner),
                data: Some(data.clone()),
                ..Default::default()
            };
            kube.create_config_map(namespace, &config_map).await?;
            info!(configmap = %map_name, keys = data.len(), "created configuration map");
            Ok(StoreOutcome::Created)
        }
        Some(current) if current.data.as_ref() == Some(data) => {
            debug!(configmap = %map_name, "configuration map up to date");
            Ok(StoreOutcome::Unchanged)
        }
        Some(current) => {
            let mut updated = current.clone();
            updated.data = Some(data.clone());
            updated.binary_data = None;
            kube.replace_config_map(namespace, &updated).await?;
            info!(configmap = %map_name, keys = data.len(), "replaced configuration map data");
            Ok(StoreOutcome::Replaced)
        }
    }
}
