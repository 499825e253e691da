//! Controllers for the fabric service kinds
//!
//! Every kind runs the same reconcile pass, parameterised by its
//! [`ServiceStrategy`](crate::strategy::ServiceStrategy). Controllers follow
//! the Kubernetes observe-diff-act loop and are level-triggered: any pass can
//! be repeated without effect once the cluster has converged.

mod client;
mod context;
mod reconcile;
mod watches;

#[cfg(test)]
pub use client::MockKubeClient;
pub use client::{KubeClient, KubeClientImpl};
pub use context::{failure_key, Context, ContextBuilder, DEFAULT_RESYNC};
pub use reconcile::{error_policy, reconcile, SETTLE_REQUEUE};
pub use watches::{build_controllers, controller, ControllerFuture};
