//! Certificate coordination
//!
//! The operator holds a signer CA and issues one server certificate per
//! instance of every service kind. Certificates and keys for all instances
//! of one intent live in a single secret (`<name>-secret-certificates`),
//! keyed by instance address:
//!
//! - `server-<address>.crt` - PEM certificate signed by the signer CA
//! - `server-key-<address>.pem` - PEM private key
//!
//! The signer CA certificate is published into every namespace the operator
//! serves as the `fabric-signer-ca` ConfigMap, which workloads mount at
//! [`CA_BUNDLE_MOUNT_PATH`].
//!
//! # Rotation
//!
//! Leaf certificates are reissued when the subject set changes or any
//! certificate has passed 80% of its lifetime.

mod signer;

pub use signer::{
    CertificateRequest, CertificateSigner, SecretBackedSigner, SIGNER_CA_NAME,
};

#[cfg(test)]
pub use signer::MockCertificateSigner;

use std::net::IpAddr;

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use serde::Serialize;
use thiserror::Error;
use x509_parser::prelude::*;

/// Validity period for the signer CA (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Validity period for instance certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Rotation threshold as a fraction of TTL (80%)
pub const ROTATION_THRESHOLD: f64 = 0.80;

/// Directory the CA bundle ConfigMap is mounted at
pub const CA_BUNDLE_MOUNT_DIR: &str = "/etc/ssl/certs/kubernetes";

/// Full path of the CA bundle inside every container
pub const CA_BUNDLE_MOUNT_PATH: &str = "/etc/ssl/certs/kubernetes/ca-bundle.crt";

/// Key of the CA bundle inside the published ConfigMap
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

/// Directory the per-instance certificate secret is mounted at
pub const CERTIFICATES_MOUNT_DIR: &str = "/etc/certificates";

/// Name of the secret holding the instance certificates of one intent
pub fn certificates_secret_name(instance: &str) -> String {
    format!("{instance}-secret-certificates")
}

fn compute_validity(years: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(years * 365);
    (now, not_after)
}

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Subject cannot be encoded into a certificate
    #[error("invalid certificate subject: {0}")]
    InvalidSubject(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// One instance that needs a server certificate
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CertificateSubject {
    /// Pod name, used as the common name and a DNS SAN
    pub name: String,
    /// Pod IP, used as an IP SAN and to key the secret entries
    pub address: String,
    /// Additional IP SANs (the host address under host networking)
    pub alternate_addresses: Vec<String>,
}

impl CertificateSubject {
    /// Create a subject for one instance
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            alternate_addresses: Vec::new(),
        }
    }

    /// Add an alternate address, ignoring duplicates of the primary one
    pub fn with_alternate(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        if address != self.address && !self.alternate_addresses.contains(&address) {
            self.alternate_addresses.push(address);
        }
        self
    }

    /// Secret key holding this subject's certificate
    pub fn cert_key(&self) -> String {
        format!("server-{}.crt", self.address)
    }

    /// Secret key holding this subject's private key
    pub fn private_key_key(&self) -> String {
        format!("server-key-{}.pem", self.address)
    }
}

/// Validity information parsed from an issued certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        })
    }

    /// Check if the certificate is past 80% of its lifetime at `now`
    pub fn needs_rotation_at(&self, now: i64) -> bool {
        let lifetime = (self.not_after - self.not_before) as f64;
        if lifetime <= 0.0 {
            return true;
        }
        let age = (now - self.not_before) as f64;
        age / lifetime >= ROTATION_THRESHOLD
    }

    /// Check if the certificate needs rotation now
    pub fn needs_rotation(&self) -> bool {
        self.needs_rotation_at(chrono::Utc::now().timestamp())
    }
}

/// Certificate and key issued for one subject
#[derive(Clone, Debug)]
pub struct IssuedCertificate {
    /// PEM certificate
    pub cert_pem: String,
    /// PEM private key
    pub key_pem: String,
}

/// Signer certificate authority
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone)
    ca_key_pem: String,
    /// PEM-encoded CA certificate for distribution
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("Fabric".to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let ca_key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem,
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load CA from stored PEM
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let _ = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        let _ = parse_pem(cert_pem)?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate in PEM format (for distribution to workloads)
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// CA private key in PEM format (for storage)
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    /// Issue a server certificate for one instance
    ///
    /// The certificate carries the pod name as common name and DNS SAN and
    /// the pod address as IP SAN. It is valid for both server and client
    /// authentication since every tier talks TLS to its peers.
    pub fn issue(&self, subject: &CertificateSubject) -> Result<IssuedCertificate> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(subject.name.clone()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("Fabric".to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            rcgen::ExtendedKeyUsagePurpose::ServerAuth,
            rcgen::ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let dns = Ia5String::try_from(subject.name.clone()).map_err(|e| {
            PkiError::InvalidSubject(format!("invalid DNS name '{}': {}", subject.name, e))
        })?;
        let mut sans = vec![SanType::DnsName(dns)];
        for address in std::iter::once(&subject.address).chain(&subject.alternate_addresses) {
            let ip: IpAddr = address.parse().map_err(|_| {
                PkiError::InvalidSubject(format!("'{}' is not an IP address", address))
            })?;
            sans.push(SanType::IpAddress(ip));
        }
        params.subject_alt_names = sans;

        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate server key: {}", e))
        })?;
        let key_pem = key.serialize_pem();

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign server cert: {}", e))
        })?;

        Ok(IssuedCertificate {
            cert_pem: cert.pem(),
            key_pem,
        })
    }
}

/// Check that a PEM certificate was signed by the given CA
pub fn verify_signed_by(cert_pem: &str, ca_cert_pem: &str) -> Result<bool> {
    let cert_der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse cert: {}", e)))?;

    let ca_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    Ok(cert.verify_signature(Some(ca_cert.public_key())).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_can_be_created() {
        let ca = CertificateAuthority::new("Fabric Test CA").unwrap();
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_key_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn ca_round_trips_through_stored_pem() {
        let ca = CertificateAuthority::new("Fabric Test CA").unwrap();
        let loaded = CertificateAuthority::from_pem(ca.ca_cert_pem(), ca.ca_key_pem()).unwrap();
        let issued = loaded
            .issue(&CertificateSubject::new("cas1-cassandra-statefulset-0", "10.0.0.1"))
            .unwrap();
        assert!(verify_signed_by(&issued.cert_pem, ca.ca_cert_pem()).unwrap());
    }

    #[test]
    fn issued_certificate_is_signed_by_the_ca_and_named_after_the_pod() {
        let ca = CertificateAuthority::new("Fabric Test CA").unwrap();
        let subject = CertificateSubject::new("config1-config-statefulset-0", "10.0.0.5");

        let issued = ca.issue(&subject).unwrap();

        assert!(issued.key_pem.contains("PRIVATE KEY"));
        assert!(verify_signed_by(&issued.cert_pem, ca.ca_cert_pem()).unwrap());
        let info = CertificateInfo::from_pem(&issued.cert_pem).unwrap();
        assert_eq!(info.common_name, "config1-config-statefulset-0");
        assert!(!info.needs_rotation());
    }

    #[test]
    fn certificate_from_another_ca_is_rejected() {
        let ca1 = CertificateAuthority::new("CA One").unwrap();
        let ca2 = CertificateAuthority::new("CA Two").unwrap();
        let issued = ca1.issue(&CertificateSubject::new("pod-0", "10.0.0.1")).unwrap();

        assert!(!verify_signed_by(&issued.cert_pem, ca2.ca_cert_pem()).unwrap());
    }

    #[test]
    fn non_ip_address_is_an_invalid_subject() {
        let ca = CertificateAuthority::new("Fabric Test CA").unwrap();
        let result = ca.issue(&CertificateSubject::new("pod-0", "not-an-ip"));
        assert!(matches!(result, Err(PkiError::InvalidSubject(_))));
    }

    #[test]
    fn rotation_triggers_at_eighty_percent_of_lifetime() {
        let info = CertificateInfo {
            not_before: 0,
            not_after: 100,
            common_name: "pod-0".to_string(),
        };
        assert!(!info.needs_rotation_at(79));
        assert!(info.needs_rotation_at(80));
    }

    #[test]
    fn host_address_becomes_an_extra_san_once() {
        let subject = CertificateSubject::new("vr-0", "192.168.1.10")
            .with_alternate("192.168.1.10")
            .with_alternate("192.168.1.11")
            .with_alternate("192.168.1.11");
        assert_eq!(subject.alternate_addresses, vec!["192.168.1.11"]);

        let ca = CertificateAuthority::new("Fabric Test CA").unwrap();
        assert!(ca.issue(&subject).is_ok());
    }

    #[test]
    fn secret_keys_are_derived_from_the_address() {
        let subject = CertificateSubject::new("pod-0", "10.0.0.7");
        assert_eq!(subject.cert_key(), "server-10.0.0.7.crt");
        assert_eq!(subject.private_key_key(), "server-key-10.0.0.7.pem");
    }
}
