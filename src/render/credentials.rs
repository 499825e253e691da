//! Credentials fetched once per pass

use std::collections::BTreeMap;

use serde::Serialize;

use crate::controller::KubeClient;
use crate::kube_utils::secret_string;
use crate::Error;

/// Where an intent's credentials come from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialSource {
    /// Secret to read (None = use the defaults as they are)
    pub secret: Option<String>,
    /// Field names and their fallback values
    pub defaults: BTreeMap<&'static str, String>,
}

impl CredentialSource {
    /// No credentials at all
    pub fn none() -> Self {
        Self::default()
    }

    /// Read `fields` from `secret`, falling back per field
    pub fn new(secret: Option<String>, defaults: &[(&'static str, &str)]) -> Self {
        Self {
            secret,
            defaults: defaults
                .iter()
                .map(|(k, v)| (*k, (*v).to_string()))
                .collect(),
        }
    }
}

/// Resolved credential fields, exposed to templates as `creds`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Value of a field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Resolve a source against the API
    ///
    /// A named secret that does not exist is `NotFound`; an empty field in
    /// an existing secret falls back to its default.
    pub async fn fetch(
        kube: &dyn KubeClient,
        namespace: &str,
        source: &CredentialSource,
    ) -> Result<Self, Error> {
        let Some(secret_name) = &source.secret else {
            return Ok(Self::from_defaults(source));
        };
        let secret = kube
            .get_secret(namespace, secret_name)
            .await?
            .ok_or_else(|| Error::not_found("Secret", secret_name.as_str(), namespace))?;

        Ok(Self(
            source
                .defaults
                .iter()
                .map(|(field, default)| {
                    let value = secret_string(&secret, field).unwrap_or_else(|| default.clone());
                    ((*field).to_string(), value)
                })
                .collect(),
        ))
    }

    /// The source's defaults without reading any secret
    pub fn from_defaults(source: &CredentialSource) -> Self {
        Self(
            source
                .defaults
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }
}
