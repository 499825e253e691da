//! Controller wiring
//!
//! One controller per service kind. Besides its own intents, each controller
//! is woken by:
//!
//! - a provider it depends on turning active
//! - an address or phase change of one of its pods
//! - a readiness change of the workload it owns
//!
//! The mappers remember what they last saw so only real transitions enqueue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info};

use super::{error_policy, reconcile, Context};
use crate::crd::{
    AnalyticsSnmp, Cassandra, Config, Kubemanager, Rabbitmq, ServiceKind, Vrouter, Webui,
    Zookeeper, LABEL_INSTANCE, LABEL_KIND,
};
use crate::strategy::ServiceStrategy;
use crate::workload::{Readiness, Workload, WorkloadKind};

/// Watcher timeout (seconds) - must be less than the client read timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A running controller
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the controllers of every kind
///
/// `namespace` restricts every watch to one namespace; `None` watches the
/// whole cluster.
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    vec![
        controller::<Cassandra>(&client, ctx.clone(), namespace),
        controller::<Zookeeper>(&client, ctx.clone(), namespace),
        controller::<Rabbitmq>(&client, ctx.clone(), namespace),
        controller::<Config>(&client, ctx.clone(), namespace),
        controller::<AnalyticsSnmp>(&client, ctx.clone(), namespace),
        controller::<Webui>(&client, ctx.clone(), namespace),
        controller::<Vrouter>(&client, ctx.clone(), namespace),
        controller::<Kubemanager>(&client, ctx, namespace),
    ]
}

/// Build the controller of one kind
pub fn controller<K: ServiceStrategy>(
    client: &Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> ControllerFuture {
    let mut controller = Controller::new(api::<K>(client, namespace), watcher_config());
    let store = controller.store();

    for kind in K::DEPENDS_ON {
        controller = match kind {
            ServiceKind::Cassandra => {
                watch_provider::<K, Cassandra>(controller, client, namespace, store.clone())
            }
            ServiceKind::Zookeeper => {
                watch_provider::<K, Zookeeper>(controller, client, namespace, store.clone())
            }
            ServiceKind::Rabbitmq => {
                watch_provider::<K, Rabbitmq>(controller, client, namespace, store.clone())
            }
            ServiceKind::Config => {
                watch_provider::<K, Config>(controller, client, namespace, store.clone())
            }
            _ => controller,
        };
    }

    let owned = watcher_config().labels(&kind_selector(K::KIND));
    controller = controller.watches(
        api::<Pod>(client, namespace),
        owned.clone(),
        on_pod_change::<K>(Arc::new(Observed::default())),
    );

    let on_readiness = on_readiness_change::<K>(Arc::new(Observed::default()));
    controller = match K::WORKLOAD_KIND {
        WorkloadKind::StatefulSet => controller.watches(
            api::<StatefulSet>(client, namespace),
            owned,
            move |sts| on_readiness(Workload::StatefulSet(sts)),
        ),
        WorkloadKind::DaemonSet => controller.watches(
            api::<DaemonSet>(client, namespace),
            owned,
            move |ds| on_readiness(Workload::DaemonSet(ds)),
        ),
    };

    info!("- {} controller", K::KIND);

    Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(K::KIND.kind_name())),
    )
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn kind_selector(kind: ServiceKind) -> String {
    format!("{LABEL_KIND}={}", kind.as_str())
}

fn api<T>(client: &Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watch_provider<K, P>(
    controller: Controller<K>,
    client: &Client,
    namespace: Option<&str>,
    store: Store<K>,
) -> Controller<K>
where
    K: ServiceStrategy,
    P: ServiceStrategy,
{
    let seen = Arc::new(Observed::<bool>::default());
    controller.watches(api::<P>(client, namespace), watcher_config(), move |provider: P| {
        let Some(namespace) = provider.namespace() else {
            return Vec::new();
        };
        if !provider_activated(&seen, &provider) {
            return Vec::new();
        }
        let name = provider.name_any();

        let affected = dependents(store.state(), P::KIND, &name, &namespace);
        debug!(
            provider = %P::KIND,
            %name,
            %namespace,
            affected = affected.len(),
            "provider became active"
        );
        affected
    })
}

/// Whether `provider` just turned active
///
/// A provider being deleted is forgotten, so a recreated one fires again.
fn provider_activated<P: ServiceStrategy>(seen: &Observed<bool>, provider: &P) -> bool {
    let Some(namespace) = provider.namespace() else {
        return false;
    };
    let key = format!("{namespace}/{}", provider.name_any());
    if provider.meta().deletion_timestamp.is_some() {
        seen.forget(&key);
        return false;
    }
    let active = provider.intent_status().is_some_and(|s| s.is_active());
    seen.became_true(key, active)
}

/// Last value observed per object
struct Observed<V> {
    last: DashMap<String, V>,
}

impl<V> Default for Observed<V> {
    fn default() -> Self {
        Self {
            last: DashMap::new(),
        }
    }
}

impl<V: Clone + PartialEq> Observed<V> {
    /// Record `value`; true when it differs from the previous observation
    fn changed(&self, key: String, value: V) -> bool {
        match self.last.insert(key, value.clone()) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    fn forget(&self, key: &str) {
        self.last.remove(key);
    }
}

impl Observed<bool> {
    /// Record `now`; true only on a transition into `true`
    fn became_true(&self, key: String, now: bool) -> bool {
        let before = self.last.insert(key, now);
        now && before != Some(true)
    }
}

/// Intents in `namespace` that reference provider `kind`/`name`
fn dependents<K: ServiceStrategy>(
    intents: impl IntoIterator<Item = Arc<K>>,
    kind: ServiceKind,
    name: &str,
    namespace: &str,
) -> Vec<ObjectRef<K>> {
    intents
        .into_iter()
        .filter(|intent| intent.namespace().as_deref() == Some(namespace))
        .filter(|intent| {
            intent
                .dependencies()
                .iter()
                .any(|dependency| dependency.matches(kind, name))
        })
        .map(|intent| ObjectRef::from_obj(intent.as_ref()))
        .collect()
}

type PodFingerprint = (Option<String>, Option<String>);

/// Enqueue the owning intent when a pod's address or phase changes
///
/// Terminating pods always enqueue and are forgotten.
fn on_pod_change<K: ServiceStrategy>(
    seen: Arc<Observed<PodFingerprint>>,
) -> impl Fn(Pod) -> Option<ObjectRef<K>> + Send + Sync + 'static {
    move |pod: Pod| {
        let namespace = pod.namespace()?;
        let instance = pod.labels().get(LABEL_INSTANCE)?.clone();
        let key = format!("{namespace}/{}", pod.name_any());

        if pod.metadata.deletion_timestamp.is_some() {
            seen.forget(&key);
        } else {
            let status = pod.status.as_ref();
            let fingerprint = (
                status.and_then(|s| s.pod_ip.clone()),
                status.and_then(|s| s.phase.clone()),
            );
            if !seen.changed(key, fingerprint) {
                return None;
            }
        }
        Some(ObjectRef::new(&instance).within(&namespace))
    }
}

/// Enqueue the controlling intent when its workload's readiness changes
///
/// A workload being deleted always enqueues, so its owner recreates it,
/// and is forgotten.
fn on_readiness_change<K: ServiceStrategy>(
    seen: Arc<Observed<Readiness>>,
) -> impl Fn(Workload) -> Option<ObjectRef<K>> + Send + Sync + 'static {
    move |workload: Workload| {
        let metadata = workload.metadata();
        let namespace = metadata.namespace.clone()?;
        let owner = metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|o| o.controller == Some(true) && o.kind == K::kind(&()))?;

        let key = format!("{namespace}/{}", workload.name());
        if metadata.deletion_timestamp.is_some() {
            seen.forget(&key);
        } else if !seen.changed(key, workload.readiness()) {
            return None;
        }
        Some(ObjectRef::new(&owner.name).within(&namespace))
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
