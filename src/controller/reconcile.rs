//! Reconcile pass shared by every service kind
//!
//! One pass walks a fixed sequence: resolve dependencies, render, persist,
//! roll the workload when the configuration moved, then publish status.
//! Nothing is written before every dependency has resolved, and a converged
//! intent produces no writes at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::context::{failure_key, Context};
use super::KubeClient;
use crate::aggregator::Aggregator;
use crate::crd::LABEL_CONFIG_READY;
use crate::drift::{config_changed_transition, Drift};
use crate::events::{actions, reasons};
use crate::pki::{certificates_secret_name, CertificateRequest};
use crate::render::{
    config_hash, instances_from_pods, store_config_map, stored_data, Credentials, Instance,
    RenderContext,
};
use crate::status::{compute_status, status_needs_update, StatusPatch};
use crate::strategy::ServiceStrategy;
use crate::workload::{
    ensure_access, ensure_service, ensure_workload, rollout_annotations, WorkloadCompiler,
    WorkloadInput, WorkloadOutcome,
};
use crate::Error;

/// Requeue delay while a workload settles after a write or rollout
pub const SETTLE_REQUEUE: Duration = Duration::from_secs(5);

/// Reconcile one intent of kind `K`
///
/// Returns the requeue action on success. Failures are returned unchanged
/// to [`error_policy`], which owns every retry decision.
#[instrument(
    skip(intent, ctx),
    fields(kind = %K::KIND, name = %intent.name_any(), namespace = ?intent.namespace())
)]
pub async fn reconcile<K: ServiceStrategy>(intent: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error> {
    if intent.meta().deletion_timestamp.is_some() {
        debug!("intent is being deleted, owned objects are garbage collected");
        return Ok(Action::await_change());
    }

    let name = intent.name_any();
    let namespace = intent
        .namespace()
        .ok_or_else(|| Error::validation(format!("{} {name} has no namespace", K::KIND)))?;

    let action = reconcile_intent(intent.as_ref(), &ctx, &name, &namespace).await?;
    ctx.reset_failures(&failure_key(K::KIND, &namespace, &name));
    Ok(action)
}

async fn reconcile_intent<K: ServiceStrategy>(
    intent: &K,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, Error> {
    let kube = ctx.kube.as_ref();
    let object_ref = intent.object_ref(&());
    let owner = intent.controller_owner_ref(&());

    intent.validate()?;

    let dependencies = match Aggregator::new(kube)
        .resolve_all(&intent.dependencies(), namespace)
        .await
    {
        Ok(dependencies) => dependencies,
        Err(err @ Error::NotFound { .. }) => {
            publish_warning(ctx, &object_ref, reasons::DEPENDENCY_MISSING, actions::RECONCILE, &err).await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    if let Some(secret) = intent.published_secret() {
        publish_secret(kube, namespace, owner.clone(), secret).await?;
    }

    let credentials =
        Credentials::fetch(kube, namespace, &intent.credential_source(&dependencies)).await?;
    let pods = kube
        .list_pods(namespace, &K::KIND.pod_selector(name))
        .await?;
    let instances = instances_from_pods(&pods);

    let render_ctx = RenderContext::new(
        name,
        namespace,
        instances.clone(),
        &dependencies,
        &credentials,
    );
    let data = match intent.render(&render_ctx, &ctx.templates) {
        Ok(data) => data,
        Err(err) => {
            publish_warning(ctx, &object_ref, reasons::RENDER_FAILED, actions::RENDER, &err).await;
            return Err(err);
        }
    };
    let hash = config_hash(&data);

    let existing_map = kube
        .get_config_map(namespace, &K::KIND.config_map_name(name))
        .await?;
    let workload_name = K::WORKLOAD_KIND.workload_name(K::KIND, name);
    let existing_workload = kube
        .get_workload(K::WORKLOAD_KIND, namespace, &workload_name)
        .await?;
    let drift = Drift::detect(
        stored_data(existing_map.as_ref()).as_ref(),
        &data,
        existing_workload
            .as_ref()
            .and_then(|w| w.applied_config_hash()),
    );

    let ports = intent.service_ports();
    let endpoint = if ports.is_empty() {
        None
    } else {
        let service =
            WorkloadCompiler::compile_service(K::KIND, name, namespace, owner.clone(), &ports);
        ensure_service(kube, namespace, &service).await?
    };

    if !instances.is_empty() {
        let host_network = intent.host_network();
        ctx.signer
            .ensure_signed(&CertificateRequest {
                namespace: namespace.to_string(),
                secret_name: certificates_secret_name(name),
                owner: owner.clone(),
                subjects: instances
                    .iter()
                    .map(|i| i.certificate_subject(host_network, endpoint.as_deref()))
                    .collect(),
            })
            .await?;
    }

    store_config_map(
        kube,
        K::KIND,
        name,
        namespace,
        owner.clone(),
        existing_map.as_ref(),
        &data,
    )
    .await?;
    open_ready_gates(kube, namespace, &pods, &instances).await?;

    let access = intent.access();
    if let Some(grant) = &access {
        ensure_access(
            kube,
            namespace,
            &grant.compile(K::KIND, name, namespace, owner.clone()),
        )
        .await?;
    }

    let desired = WorkloadCompiler::compile(&WorkloadInput {
        kind: K::KIND,
        workload_kind: K::WORKLOAD_KIND,
        name,
        namespace,
        owner,
        common: intent.common(),
        host_network: intent.host_network(),
        containers: intent.containers(),
        config_hash: &hash,
        images: &ctx.images,
        service_account: access.as_ref().map(|g| g.service_account.as_str()),
    });
    let rollout = drift
        .rollout_hash()
        .map(|rollout_hash| rollout_annotations(rollout_hash, Utc::now()));
    let (outcome, workload) =
        ensure_workload(kube, namespace, desired, K::UPDATE_STRATEGY, rollout.as_ref()).await?;
    match outcome {
        WorkloadOutcome::Created => {
            notify(ctx, &object_ref, reasons::WORKLOAD_CREATED, &workload_name).await;
        }
        WorkloadOutcome::Updated => {
            notify(ctx, &object_ref, reasons::WORKLOAD_UPDATED, &workload_name).await;
        }
        WorkloadOutcome::Unchanged | WorkloadOutcome::Terminating => {}
    }

    // Created and replaced workloads already carry the rollout annotations
    if let (Some(annotations), WorkloadOutcome::Unchanged) = (&rollout, outcome) {
        kube.annotate_pod_template(K::WORKLOAD_KIND, namespace, &workload_name, annotations)
            .await?;
    }

    let current = intent.intent_status();
    let previously_changed = current.is_some_and(|s| s.is_config_changed());

    if outcome.requires_requeue() {
        // The observed workload is on its way out; its readiness says nothing
        if drift.requires_rollout() && !previously_changed {
            let mut flagged = current.cloned().unwrap_or_default();
            flagged.config_changed = Some(true);
            kube.patch_status(K::KIND, namespace, name, &StatusPatch::between(current, flagged))
                .await?;
        }
    } else {
        let config_changed = config_changed_transition(&drift, previously_changed)
            .or_else(|| current.and_then(|s| s.config_changed));
        let status = compute_status(&instances, workload.readiness(), endpoint, config_changed);
        if status_needs_update(current, &status) {
            debug!(active = ?status.active, nodes = status.nodes.len(), "writing status");
            kube.patch_status(K::KIND, namespace, name, &StatusPatch::between(current, status))
                .await?;
        }
    }

    if let Some(rollout_hash) = drift.rollout_hash() {
        info!(workload = %workload_name, hash = rollout_hash, "configuration changed, rolling workload");
        ctx.events
            .publish(
                &object_ref,
                EventType::Normal,
                reasons::CONFIG_CHANGED,
                actions::ROLLOUT,
                Some(format!("rolling {workload_name} onto configuration {rollout_hash}")),
            )
            .await;
    }

    if drift.requires_rollout() || outcome.requires_requeue() {
        Ok(Action::requeue(SETTLE_REQUEUE))
    } else {
        Ok(Action::requeue(ctx.resync))
    }
}

/// Label every addressed pod whose configuration is now stored
///
/// The pod's init gate holds its containers until the label appears.
async fn open_ready_gates(
    kube: &dyn KubeClient,
    namespace: &str,
    pods: &[Pod],
    instances: &[Instance],
) -> Result<(), Error> {
    let labels = BTreeMap::from([(LABEL_CONFIG_READY.to_string(), "true".to_string())]);
    for pod in pods {
        let pod_name = pod.name_any();
        let addressed = instances.iter().any(|i| i.name == pod_name);
        let open = pod.labels().get(LABEL_CONFIG_READY).map(String::as_str) == Some("true");
        if addressed && !open {
            kube.label_pod(namespace, &pod_name, &labels).await?;
            debug!(pod = %pod_name, "opened ready gate");
        }
    }
    Ok(())
}

/// Create the intent's published secret when absent; never overwrite it
async fn publish_secret(
    kube: &dyn KubeClient,
    namespace: &str,
    owner: Option<OwnerReference>,
    mut secret: Secret,
) -> Result<(), Error> {
    let secret_name = secret.metadata.name.clone().unwrap_or_default();
    if kube.get_secret(namespace, &secret_name).await?.is_some() {
        return Ok(());
    }

    secret.metadata.namespace = Some(namespace.to_string());
    secret.metadata.owner_references = owner.map(|o| vec![o]);
    match kube.create_secret(namespace, &secret).await {
        Ok(()) => {
            info!(secret = %secret_name, "created published secret");
            Ok(())
        }
        Err(Error::Conflict(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

async fn publish_warning(ctx: &Context, object_ref: &ObjectReference, reason: &str, action: &str, err: &Error) {
    ctx.events
        .publish(object_ref, EventType::Warning, reason, action, Some(err.to_string()))
        .await;
}

async fn notify(ctx: &Context, object_ref: &ObjectReference, reason: &str, workload: &str) {
    ctx.events
        .publish(
            object_ref,
            EventType::Normal,
            reason,
            actions::RECONCILE,
            Some(workload.to_string()),
        )
        .await;
}

/// Requeue policy after a failed pass
///
/// Never gives up. Conflicts retry almost immediately; everything else
/// backs off exponentially on the object's consecutive failure count.
/// Errors that need a spec change wait the maximum delay.
pub fn error_policy<K: ServiceStrategy>(intent: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action {
    let namespace = intent.namespace().unwrap_or_default();
    let name = intent.name_any();
    let failures = ctx.record_failure(&failure_key(K::KIND, &namespace, &name));

    let delay = match err.immediate_retry_delay() {
        Some(delay) => delay,
        None if err.is_retryable() => ctx.backoff.jittered_delay_for_attempt(failures),
        None => ctx.backoff.max_delay,
    };

    if err.is_retryable() {
        warn!(
            kind = %K::KIND,
            %name,
            %namespace,
            error = %err,
            category = err.category(),
            failures,
            retry_in = ?delay,
            "reconcile failed"
        );
    } else {
        error!(
            kind = %K::KIND,
            %name,
            %namespace,
            error = %err,
            category = err.category(),
            failures,
            retry_in = ?delay,
            "reconcile failed, intent needs a spec change"
        );
    }

    Action::requeue(delay)
}
