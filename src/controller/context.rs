//! Shared controller context

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::KubeClient;
use crate::crd::ServiceKind;
use crate::events::{EventPublisher, NoopEventPublisher};
use crate::pki::CertificateSigner;
use crate::retry::RetryConfig;
use crate::strategy::all_templates;
use crate::template::TemplateEngine;
use crate::workload::ImageSettings;
use crate::Error;

/// Steady-state requeue interval
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(300);

/// Shared state for every reconcile of every kind
///
/// Built once at startup and handed to each controller behind an `Arc`.
/// Collaborators are trait objects so tests can substitute mocks.
///
/// ```ignore
/// let ctx = Context::builder(kube, signer)
///     .events(Arc::new(KubeEventPublisher::new(client, "fabric-operator")))
///     .images(images)
///     .build()?;
/// ```
pub struct Context {
    /// Kubernetes API access
    pub kube: Arc<dyn KubeClient>,
    /// PKI collaborator
    pub signer: Arc<dyn CertificateSigner>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Compiled templates of every kind
    pub templates: Arc<TemplateEngine>,
    /// Registry and tag for default container images
    pub images: ImageSettings,
    /// Backoff applied by the error policy
    pub backoff: RetryConfig,
    /// Requeue interval of a converged intent
    pub resync: Duration,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Start building a context around the two required collaborators
    pub fn builder(kube: Arc<dyn KubeClient>, signer: Arc<dyn CertificateSigner>) -> ContextBuilder {
        ContextBuilder::new(kube, signer)
    }

    /// Count one more consecutive failure and return the new count
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    /// Forget the failures of an object after a successful pass
    pub fn reset_failures(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures currently recorded for an object
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }

    /// Context wired to mock collaborators and the real templates
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, signer: Arc<dyn CertificateSigner>) -> Self {
        Self::builder(kube, signer)
            .build()
            .expect("templates compile")
    }
}

/// Key under which failures of one intent are counted
pub fn failure_key(kind: ServiceKind, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    kube: Arc<dyn KubeClient>,
    signer: Arc<dyn CertificateSigner>,
    events: Option<Arc<dyn EventPublisher>>,
    templates: Option<Arc<TemplateEngine>>,
    images: ImageSettings,
    backoff: RetryConfig,
    resync: Duration,
}

impl ContextBuilder {
    fn new(kube: Arc<dyn KubeClient>, signer: Arc<dyn CertificateSigner>) -> Self {
        Self {
            kube,
            signer,
            events: None,
            templates: None,
            images: ImageSettings::default(),
            backoff: RetryConfig::default(),
            resync: DEFAULT_RESYNC,
        }
    }

    /// Set the event publisher (default: drop events)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use an already compiled template engine
    pub fn templates(mut self, templates: Arc<TemplateEngine>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Set registry and tag for default images
    pub fn images(mut self, images: ImageSettings) -> Self {
        self.images = images;
        self
    }

    /// Set the error-policy backoff
    pub fn backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the steady-state requeue interval
    pub fn resync(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    /// Build the context, compiling every template unless one was supplied
    ///
    /// # Errors
    ///
    /// Returns `Error::Render` if a template fails to compile.
    pub fn build(self) -> Result<Context, Error> {
        let templates = match self.templates {
            Some(templates) => templates,
            None => Arc::new(TemplateEngine::with_templates(all_templates())?),
        };
        Ok(Context {
            kube: self.kube,
            signer: self.signer,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            templates,
            images: self.images,
            backoff: self.backoff,
            resync: self.resync,
            failures: DashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::pki::MockCertificateSigner;

    fn context() -> Context {
        Context::for_testing(
            Arc::new(MockKubeClient::new()),
            Arc::new(MockCertificateSigner::new()),
        )
    }

    #[test]
    fn failures_accumulate_per_object_and_reset_on_success() {
        let ctx = context();
        let cassandra = failure_key(ServiceKind::Cassandra, "tf", "cas1");
        let zookeeper = failure_key(ServiceKind::Zookeeper, "tf", "zk1");

        assert_eq!(ctx.record_failure(&cassandra), 1);
        assert_eq!(ctx.record_failure(&cassandra), 2);
        assert_eq!(ctx.record_failure(&zookeeper), 1);

        ctx.reset_failures(&cassandra);
        assert_eq!(ctx.failure_count(&cassandra), 0);
        assert_eq!(ctx.failure_count(&zookeeper), 1);
    }

    #[test]
    fn builder_defaults() {
        let ctx = context();
        assert_eq!(ctx.resync, DEFAULT_RESYNC);
        assert_eq!(ctx.images, ImageSettings::default());
        assert!(ctx.templates.has_template("zookeeper/zoo.cfg"));
    }

    #[test]
    fn failure_keys_name_kind_namespace_and_object() {
        assert_eq!(
            failure_key(ServiceKind::AnalyticsSnmp, "tf", "snmp1"),
            "AnalyticsSnmp/tf/snmp1"
        );
    }
}
