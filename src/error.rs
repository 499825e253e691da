//! Error types for the fabric operator

use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;
use crate::template::TemplateError;

/// Main error type for reconcile operations
///
/// Every component returns one of these instead of recovering locally. The
/// controller's error policy is the only place that decides how long to wait
/// before the next attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A referenced dependency or secret does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        /// Kind of the missing object (e.g. "Cassandra", "Secret")
        kind: String,
        /// Name of the missing object (empty when resolving the default instance)
        name: String,
        /// Namespace that was searched
        namespace: String,
    },

    /// Optimistic-concurrency write conflict
    #[error("conflict writing {0}")]
    Conflict(String),

    /// Required template input missing or invalid
    #[error("render error: {0}")]
    Render(String),

    /// Workload create/update rejected by the platform
    #[error("workload lifecycle error: {0}")]
    Lifecycle(String),

    /// PKI collaborator failed
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Kubernetes API error not covered by a more specific variant
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Malformed intent specification
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a not-found error for a named object
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a conflict error for the given object description
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a render error with the given message
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create a workload lifecycle error with the given message
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create a certificate error with the given message
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Map a failed write into the taxonomy: 409 becomes `Conflict`,
    /// everything else is wrapped by `otherwise`.
    pub fn from_write(err: kube::Error, what: &str, otherwise: fn(String) -> Self) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(what),
            other => otherwise(format!("{what}: {other}")),
        }
    }

    /// Whether another attempt can succeed without a spec change.
    ///
    /// The controller requeues regardless; this only selects the backoff
    /// curve and the log level.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_) | Self::Render(_) | Self::Serialization(_)
        )
    }

    /// Fixed delay for errors that bypass exponential backoff
    pub fn immediate_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Conflict(_) => Some(Duration::from_millis(100)),
            _ => None,
        }
    }

    /// Short machine-readable category, used as a log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Render(_) => "render",
            Self::Lifecycle(_) => "lifecycle",
            Self::Certificate(_) => "certificate",
            Self::Kube(_) => "kube",
            Self::Validation(_) => "validation",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<TemplateError> for Error {
    fn from(err: TemplateError) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<PkiError> for Error {
    fn from(err: PkiError) -> Self {
        Self::Certificate(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
