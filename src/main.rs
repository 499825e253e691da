//! Fabric Operator - orchestrates the networking control plane on Kubernetes

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fabric_operator::controller::{build_controllers, Context, KubeClient, KubeClientImpl};
use fabric_operator::crd::{
    AnalyticsSnmp, Cassandra, Config, Kubemanager, Rabbitmq, Vrouter, Webui, Zookeeper,
};
use fabric_operator::events::KubeEventPublisher;
use fabric_operator::kube_utils::FIELD_MANAGER;
use fabric_operator::pki::SecretBackedSigner;
use fabric_operator::retry::{retry_with_backoff, RetryConfig};
use fabric_operator::workload::ImageSettings;

/// Fabric - CRD-driven operator for the networking control plane
#[derive(Parser, Debug)]
#[command(name = "fabric-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON
    #[arg(long, env = "FABRIC_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Run(RunArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "FABRIC_WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Namespace holding the signer CA
    #[arg(long, env = "FABRIC_OPERATOR_NAMESPACE", default_value = "fabric-system")]
    operator_namespace: String,

    /// Registry prefix for default images
    #[arg(long, env = "FABRIC_IMAGE_REGISTRY", default_value = "docker.io/opencontrailnightly")]
    image_registry: String,

    /// Tag for default images
    #[arg(long, env = "FABRIC_IMAGE_TAG", default_value = "latest")]
    image_tag: String,

    /// Requeue interval of a converged intent, in seconds
    #[arg(long, env = "FABRIC_RESYNC_SECS", default_value = "300")]
    resync_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Run(args)) => run_controller(args).await,
        None => run_controller(RunArgs::parse_from(["fabric-operator"])).await,
    }
}

fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Cassandra::crd(),
        Zookeeper::crd(),
        Rabbitmq::crd(),
        Config::crd(),
        AnalyticsSnmp::crd(),
        Webui::crd(),
        Vrouter::crd(),
        Kubemanager::crd(),
    ]
}

/// Install every CRD with server-side apply
///
/// The operator installs its own CRDs on startup so their versions always
/// match the binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("CRD without a name"))?;
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All fabric CRDs installed/updated");
    Ok(())
}

async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("Fabric operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let startup = RetryConfig::with_max_attempts(10);
    retry_with_backoff(&startup, "install CRDs", || ensure_crds_installed(&client)).await?;

    let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client.clone()));
    let signer = retry_with_backoff(&startup, "load signer CA", || {
        SecretBackedSigner::load_or_create(kube.clone(), &args.operator_namespace)
    })
    .await?;

    let ctx = Context::builder(kube, Arc::new(signer))
        .events(Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER)))
        .images(ImageSettings {
            registry: args.image_registry,
            tag: args.image_tag,
        })
        .resync(Duration::from_secs(args.resync_secs))
        .build()?;

    match &args.namespace {
        Some(ns) => tracing::info!(namespace = %ns, "Starting controllers"),
        None => tracing::info!("Starting controllers for all namespaces"),
    }
    let controllers = build_controllers(client, Arc::new(ctx), args.namespace.as_deref());

    futures::future::join_all(controllers).await;

    tracing::info!("Fabric operator shutting down");
    Ok(())
}
