//! Fabric - CRD-driven Kubernetes operator for a networking control plane
//!
//! Each tier of the control plane (database, coordination, broker, API,
//! analytics, web console, per-node agents) is declared as a custom resource.
//! The operator renders every tier's configuration from the live state of the
//! tiers it depends on, keeps the workloads running that configuration, and
//! rolls pods whenever the rendered configuration moves.
//!
//! # Architecture
//!
//! One generic reconcile engine serves all eight kinds. What differs per kind
//! lives behind the [`strategy::ServiceStrategy`] trait; everything else is
//! shared:
//!
//! - dependencies are resolved from the providers' published status
//! - configuration is rendered by pure templates and stored in a ConfigMap
//! - drift between renders triggers exactly one rollout of the workload
//! - status reports members and majority readiness
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions for the eight service kinds
//! - [`aggregator`] - Dependency resolution into connection details
//! - [`render`] - Render context, credentials and ConfigMap persistence
//! - [`template`] - Strict template engine and filters
//! - [`strategy`] - Per-kind behaviour
//! - [`workload`] - StatefulSet/DaemonSet compilation and lifecycle
//! - [`drift`] - Configuration drift detection
//! - [`status`] - Status and quorum
//! - [`pki`] - Certificate signing for instances
//! - [`controller`] - Reconcile engine and controller wiring
//! - [`events`] - Kubernetes Event publishing
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod aggregator;
pub mod controller;
pub mod crd;
pub mod drift;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod pki;
pub mod render;
pub mod retry;
pub mod status;
pub mod strategy;
pub mod template;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
