//! Per-replica endpoint reconciliation for TrainingJobs
//!
//! Every (replica type, index) of a TrainingJob gets one headless Service so
//! distributed processes can find each other by stable DNS name:
//! - [`classifier`] buckets observed endpoints by replica index
//! - [`expectations`] tracks in-flight creations against a stale cache
//! - [`reconciler`] creates the endpoints a role is missing
//! - [`router`] maps endpoint watch events back to the owning job
//! - [`controller`] drives all roles of a job from the kube-rs Controller

pub mod builder;
pub mod classifier;
pub mod control;
pub mod controller;
pub mod error;
pub mod expectations;
pub mod informer;
pub mod reconciler;
pub mod router;

#[cfg(test)]
mod testing;

pub use control::{EndpointControl, KubeEndpointControl};
pub use controller::{error_policy, reconcile, EndpointContext};
pub use error::EndpointError;
pub use expectations::{ControllerExpectations, ExpectationsError};
pub use reconciler::{EndpointReconciler, RoleOutcome};
pub use router::{ChannelJobQueue, JobQueue, NotificationRouter, OwnerResolver};
