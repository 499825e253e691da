//! Types shared by every service intent CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pod-level configuration every service kind carries
///
/// This is the structurally shared part of each intent. The service-specific
/// part lives in the kind's own `serviceConfiguration` fragment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfiguration {
    /// Number of replicas (ignored by per-node kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Node selector applied to the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations applied to the pod template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Run pods in the host network namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,

    /// Names of image pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Authentication parameters for services that talk to the API tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_parameters: Option<AuthParameters>,

    /// Per-container image and command overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerOverride>,
}

impl CommonConfiguration {
    /// Declared replica count, defaulting to 1
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    /// Whether pods run with host networking
    pub fn host_network(&self) -> bool {
        self.host_network.unwrap_or(false)
    }

    /// Look up the override for a container by name
    pub fn container(&self, name: &str) -> Option<&ContainerOverride> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Resolved authentication mode
    pub fn auth_mode(&self) -> AuthMode {
        self.auth_parameters
            .as_ref()
            .map(|a| a.auth_mode.clone())
            .unwrap_or_default()
    }

    /// Resolved keystone settings (defaults when none are declared)
    pub fn keystone(&self) -> KeystoneSettings {
        self.auth_parameters
            .as_ref()
            .and_then(|a| a.keystone.as_ref())
            .map(KeystoneAuthParameters::resolve)
            .unwrap_or_else(|| KeystoneAuthParameters::default().resolve())
    }

    /// Validate the parts of the fragment the engine depends on
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(crate::Error::validation(format!(
                    "replicas must not be negative, got {replicas}"
                )));
            }
        }
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(crate::Error::validation(
                    "container override without a name",
                ));
            }
        }
        Ok(())
    }
}

/// Toleration applied to the pod template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Taint key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Exists or Equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// NoSchedule, PreferNoSchedule or NoExecute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Override for one container of the workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    /// Container name as defined by the service kind
    pub name: String,
    /// Replacement image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Replacement command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// Authentication mode of the control plane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication
    #[default]
    Noauth,
    /// Keystone authentication
    Keystone,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noauth => write!(f, "noauth"),
            Self::Keystone => write!(f, "keystone"),
        }
    }
}

/// Authentication parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthParameters {
    /// Authentication mode
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Keystone connection parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystone: Option<KeystoneAuthParameters>,
}

/// Keystone connection parameters as declared
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAuthParameters {
    /// Keystone address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Keystone port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// http or https
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_protocol: Option<String>,
    /// Admin user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    /// Admin password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    /// Keystone region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Admin project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// User domain name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain: Option<String>,
    /// Project domain name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_domain: Option<String>,
}

impl KeystoneAuthParameters {
    /// Fill every unset field with its default
    pub fn resolve(&self) -> KeystoneSettings {
        KeystoneSettings {
            address: self.address.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(5000),
            auth_protocol: self.auth_protocol.clone().unwrap_or_else(|| "http".to_string()),
            admin_username: self.admin_username.clone().unwrap_or_else(|| "admin".to_string()),
            admin_password: self
                .admin_password
                .clone()
                .unwrap_or_else(|| "contrail123".to_string()),
            region: self.region.clone().unwrap_or_else(|| "RegionOne".to_string()),
            project: self.project.clone().unwrap_or_else(|| "admin".to_string()),
            user_domain: self.user_domain.clone().unwrap_or_else(|| "Default".to_string()),
            project_domain: self
                .project_domain
                .clone()
                .unwrap_or_else(|| "Default".to_string()),
        }
    }
}

/// Keystone parameters with defaults applied, ready for rendering
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KeystoneSettings {
    /// Keystone address
    pub address: String,
    /// Keystone port
    pub port: u16,
    /// http or https
    pub auth_protocol: String,
    /// Admin user name
    pub admin_username: String,
    /// Admin password
    pub admin_password: String,
    /// Keystone region
    pub region: String,
    /// Admin project
    pub project: String,
    /// User domain name
    pub user_domain: String,
    /// Project domain name
    pub project_domain: String,
}

/// Status shared by every service intent
///
/// Written only by the controller. Nothing here feeds back into rendering.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Majority of replicas ready (absent = not yet computed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    /// The last pass detected a configuration change and rolled the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_changed: Option<bool>,

    /// Instance name to network address, regardless of readiness
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, String>,

    /// Cluster IP of the service fronting the instances, for kinds that expose one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Declared replicas of the workload at the last status computation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Ready replicas of the workload at the last status computation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
}

impl ServiceStatus {
    /// True only when `active` is explicitly true
    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }

    /// True only when `configChanged` is explicitly true
    pub fn is_config_changed(&self) -> bool {
        self.config_changed == Some(true)
    }
}
