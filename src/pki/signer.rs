//! Certificate signer backed by Kubernetes secrets

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{
    verify_signed_by, CertificateAuthority, CertificateInfo, CertificateSubject, CA_BUNDLE_KEY,
};
use crate::controller::KubeClient;
use crate::kube_utils::{deterministic_hash, secret_string};
use crate::Error;

/// Name of the signer CA secret (operator namespace) and the published
/// CA bundle ConfigMap (every served namespace)
pub const SIGNER_CA_NAME: &str = "fabric-signer-ca";

/// Annotation recording which subject set a certificate secret was issued for
pub const SUBJECTS_HASH_ANNOTATION: &str = "fabric.dev/subjects-hash";

const CA_CERT_KEY: &str = "ca.crt";
const CA_KEY_KEY: &str = "ca.key";

/// Certificates requested for the instances of one intent
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateRequest {
    /// Namespace of the intent
    pub namespace: String,
    /// Secret that stores every instance's certificate and key
    pub secret_name: String,
    /// Controller owner reference to the intent
    pub owner: Option<OwnerReference>,
    /// One subject per instance
    pub subjects: Vec<CertificateSubject>,
}

/// PKI collaborator
///
/// Implementations must be idempotent for an unchanged subject set.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateSigner: Send + Sync {
    /// Ensure every subject has a valid certificate signed by the signer CA
    async fn ensure_signed(&self, request: &CertificateRequest) -> Result<(), Error>;
}

/// Signer that keeps the CA and issued certificates in secrets
pub struct SecretBackedSigner {
    kube: Arc<dyn KubeClient>,
    ca: CertificateAuthority,
    published: DashSet<String>,
}

impl SecretBackedSigner {
    /// Create a signer around an already loaded CA
    pub fn new(kube: Arc<dyn KubeClient>, ca: CertificateAuthority) -> Self {
        Self {
            kube,
            ca,
            published: DashSet::new(),
        }
    }

    /// Load the signer CA from the operator namespace, generating it on first start
    pub async fn load_or_create(
        kube: Arc<dyn KubeClient>,
        operator_namespace: &str,
    ) -> Result<Self, Error> {
        if let Some(secret) = kube.get_secret(operator_namespace, SIGNER_CA_NAME).await? {
            if let (Some(cert), Some(key)) = (
                secret_string(&secret, CA_CERT_KEY),
                secret_string(&secret, CA_KEY_KEY),
            ) {
                let ca = CertificateAuthority::from_pem(&cert, &key)?;
                info!(namespace = %operator_namespace, "loaded signer CA");
                return Ok(Self::new(kube, ca));
            }
            warn!(namespace = %operator_namespace, "signer CA secret is incomplete, regenerating");
        }

        let ca = CertificateAuthority::new("Fabric Signer CA")?;
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(SIGNER_CA_NAME.to_string()),
                namespace: Some(operator_namespace.to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([
                (
                    CA_CERT_KEY.to_string(),
                    ByteString(ca.ca_cert_pem().as_bytes().to_vec()),
                ),
                (
                    CA_KEY_KEY.to_string(),
                    ByteString(ca.ca_key_pem().as_bytes().to_vec()),
                ),
            ])),
            ..Default::default()
        };
        kube.apply_secret(operator_namespace, &secret).await?;
        info!(namespace = %operator_namespace, "generated signer CA");
        Ok(Self::new(kube, ca))
    }

    /// PEM of the signer CA certificate
    pub fn ca_cert_pem(&self) -> &str {
        self.ca.ca_cert_pem()
    }

    async fn publish_ca_bundle(&self, namespace: &str) -> Result<(), Error> {
        if self.published.contains(namespace) {
            return Ok(());
        }
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SIGNER_CA_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CA_BUNDLE_KEY.to_string(),
                self.ca.ca_cert_pem().to_string(),
            )])),
            ..Default::default()
        };
        self.kube.apply_config_map(namespace, &config_map).await?;
        self.published.insert(namespace.to_string());
        debug!(%namespace, "published signer CA bundle");
        Ok(())
    }

    /// Hash over the CA and the sorted subject set
    fn subjects_hash(&self, subjects: &[CertificateSubject]) -> String {
        let mut sorted = subjects.to_vec();
        sorted.sort();
        let mut input = String::from(self.ca.ca_cert_pem());
        for subject in &sorted {
            input.push('\n');
            input.push_str(&subject.name);
            input.push('=');
            input.push_str(&subject.address);
            for alt in &subject.alternate_addresses {
                input.push(',');
                input.push_str(alt);
            }
        }
        deterministic_hash(&input)
    }

    /// Whether the stored secret still serves `subjects`
    ///
    /// Each certificate must be present, outside its rotation window, and
    /// signed by the current CA.
    fn is_current(&self, existing: &Secret, hash: &str, subjects: &[CertificateSubject]) -> bool {
        let recorded = existing
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SUBJECTS_HASH_ANNOTATION));
        if recorded.map(String::as_str) != Some(hash) {
            return false;
        }
        subjects.iter().all(|subject| {
            secret_string(existing, &subject.private_key_key()).is_some()
                && secret_string(existing, &subject.cert_key()).is_some_and(|pem| {
                    CertificateInfo::from_pem(&pem).is_ok_and(|info| !info.needs_rotation())
                        && verify_signed_by(&pem, self.ca.ca_cert_pem()).unwrap_or(false)
                })
        })
    }
}

#[async_trait]
impl CertificateSigner for SecretBackedSigner {
    async fn ensure_signed(&self, request: &CertificateRequest) -> Result<(), Error> {
        let namespace = &request.namespace;
        self.publish_ca_bundle(namespace).await?;

        let hash = self.subjects_hash(&request.subjects);
        if let Some(existing) = self.kube.get_secret(namespace, &request.secret_name).await? {
            if self.is_current(&existing, &hash, &request.subjects) {
                return Ok(());
            }
        }

        let mut data = BTreeMap::new();
        for subject in &request.subjects {
            let issued = self.ca.issue(subject)?;
            data.insert(subject.cert_key(), ByteString(issued.cert_pem.into_bytes()));
            data.insert(
                subject.private_key_key(),
                ByteString(issued.key_pem.into_bytes()),
            );
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(request.secret_name.clone()),
                namespace: Some(namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    SUBJECTS_HASH_ANNOTATION.to_string(),
                    hash,
                )])),
                owner_references: request.owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Default::default()
        };
        self.kube.apply_secret(namespace, &secret).await?;
        info!(
            secret = %request.secret_name,
            %namespace,
            subjects = request.subjects.len(),
            "issued instance certificates"
        );
        Ok(())
    }
}
