//! Endpoint notification routing
//!
//! Maps endpoint lifecycle notifications back to the TrainingJob that
//! controls them, lowers that job's expectations, and puts the job back on
//! the work queue. Endpoints that no TrainingJob controls are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kubetrain_common::crd::{ReplicaType, TrainingJob};
use kubetrain_common::kube_utils::{controller_of, object_key};
use kubetrain_common::{JOB_NAME_LABEL_KEY, REPLICA_INDEX_LABEL_KEY, REPLICA_TYPE_LABEL_KEY};

use crate::expectations::{endpoints_key, ControllerExpectations};
use crate::informer::EndpointEvent;

/// Labels whose change moves an endpoint to another slot
const SLOT_LABELS: [&str; 3] = [
    REPLICA_TYPE_LABEL_KEY,
    REPLICA_INDEX_LABEL_KEY,
    JOB_NAME_LABEL_KEY,
];

/// Looks up the job a controller reference points at
pub trait OwnerResolver: Send + Sync {
    /// The controlling job, if it still exists with the referenced UID
    fn resolve_owner(
        &self,
        namespace: Option<&str>,
        owner_ref: &OwnerReference,
    ) -> Option<Arc<TrainingJob>>;
}

impl OwnerResolver for Store<TrainingJob> {
    fn resolve_owner(
        &self,
        namespace: Option<&str>,
        owner_ref: &OwnerReference,
    ) -> Option<Arc<TrainingJob>> {
        if owner_ref.kind != TrainingJob::kind(&()) {
            return None;
        }
        let mut key = ObjectRef::new(&owner_ref.name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        let job = self.get(&key)?;
        // A job recreated under the same name is a different owner
        (job.uid().as_deref() == Some(owner_ref.uid.as_str())).then_some(job)
    }
}

/// Work queue of jobs to reconcile
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: ObjectRef<TrainingJob>);
}

/// [`JobQueue`] feeding a channel, drained by `Controller::reconcile_on`
///
/// The controller's scheduler coalesces duplicate keys.
pub struct ChannelJobQueue {
    tx: mpsc::UnboundedSender<ObjectRef<TrainingJob>>,
}

impl ChannelJobQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ObjectRef<TrainingJob>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobQueue for ChannelJobQueue {
    fn enqueue(&self, job: ObjectRef<TrainingJob>) {
        if self.tx.send(job).is_err() {
            debug!("job queue closed, dropping requeue");
        }
    }
}

/// Why a notification did not re-queue a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The endpoint is already being deleted
    BeingDeleted,
    /// No controller owner reference
    NoControllerRef,
    /// The controller reference does not resolve to a live TrainingJob
    OwnerNotFound,
    /// The endpoint has no replica-type label
    MissingReplicaType,
    /// Periodic resync with an unchanged resource version
    Resync,
    /// The update did not touch anything slot-relevant
    NoRelevantChange,
}

/// Result of routing one notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Enqueued,
    Ignored(IgnoreReason),
}

/// Routes endpoint notifications to the owning job
pub struct NotificationRouter {
    expectations: Arc<ControllerExpectations>,
    resolver: Arc<dyn OwnerResolver>,
    queue: Arc<dyn JobQueue>,
}

impl NotificationRouter {
    pub fn new(
        expectations: Arc<ControllerExpectations>,
        resolver: Arc<dyn OwnerResolver>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            expectations,
            resolver,
            queue,
        }
    }

    /// Consume notifications until the stream ends
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = EndpointEvent>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            self.handle(&event);
        }
        info!("endpoint notification stream ended");
    }

    /// Route a single notification
    pub fn handle(&self, event: &EndpointEvent) -> RouteDecision {
        match event {
            EndpointEvent::Added(svc) => self.on_endpoint_added(svc),
            EndpointEvent::Updated { old, new } => self.on_endpoint_updated(old, new),
            EndpointEvent::Deleted(svc) => self.on_endpoint_deleted(svc),
        }
    }

    /// A new endpoint appeared in the cache
    pub fn on_endpoint_added(&self, svc: &Service) -> RouteDecision {
        if svc.metadata.deletion_timestamp.is_some() {
            // Seen on controller restart; not the creation we expected
            debug!(endpoint = %svc.name_any(), "added endpoint is already being deleted");
            return RouteDecision::Ignored(IgnoreReason::BeingDeleted);
        }

        let job = match self.controlling_job(svc) {
            Ok(job) => job,
            Err(reason) => return RouteDecision::Ignored(reason),
        };

        let Some(key) = self.expectations_key(&job, svc) else {
            return RouteDecision::Ignored(IgnoreReason::MissingReplicaType);
        };
        self.expectations.creation_observed(&key);
        self.enqueue(&job);
        RouteDecision::Enqueued
    }

    /// An endpoint in the cache changed
    pub fn on_endpoint_updated(&self, old: &Service, new: &Service) -> RouteDecision {
        if old.resource_version() == new.resource_version() {
            return RouteDecision::Ignored(IgnoreReason::Resync);
        }
        if new.metadata.deletion_timestamp.is_some() {
            // Accounting waits for the Delete notification
            return match self.controlling_job(new) {
                Ok(job) => {
                    self.enqueue(&job);
                    RouteDecision::Enqueued
                }
                Err(reason) => RouteDecision::Ignored(reason),
            };
        }

        let old_ref = controller_of(&old.metadata);
        let new_ref = controller_of(&new.metadata);
        let controller_changed = old_ref.map(|r| &r.uid) != new_ref.map(|r| &r.uid);

        let mut enqueued = false;
        if controller_changed {
            if let Some(job) =
                old_ref.and_then(|r| self.resolver.resolve_owner(old.namespace().as_deref(), r))
            {
                self.enqueue(&job);
                enqueued = true;
            }
        }

        let current = match self.controlling_job(new) {
            Ok(job) => job,
            Err(reason) if !enqueued => return RouteDecision::Ignored(reason),
            Err(_) => return RouteDecision::Enqueued,
        };

        if controller_changed || slot_labels_changed(old.labels(), new.labels()) {
            self.enqueue(&current);
            RouteDecision::Enqueued
        } else if enqueued {
            RouteDecision::Enqueued
        } else {
            RouteDecision::Ignored(IgnoreReason::NoRelevantChange)
        }
    }

    /// An endpoint left the cache
    pub fn on_endpoint_deleted(&self, svc: &Service) -> RouteDecision {
        let job = match self.controlling_job(svc) {
            Ok(job) => job,
            Err(reason) => return RouteDecision::Ignored(reason),
        };

        if let Some(key) = self.expectations_key(&job, svc) {
            self.expectations.deletion_observed(&key);
        }
        self.enqueue(&job);
        RouteDecision::Enqueued
    }

    fn controlling_job(&self, svc: &Service) -> Result<Arc<TrainingJob>, IgnoreReason> {
        let owner_ref = controller_of(&svc.metadata).ok_or(IgnoreReason::NoControllerRef)?;
        self.resolver
            .resolve_owner(svc.namespace().as_deref(), owner_ref)
            .ok_or_else(|| {
                debug!(
                    endpoint = %svc.name_any(),
                    owner = %owner_ref.name,
                    "controller reference does not resolve to a TrainingJob"
                );
                IgnoreReason::OwnerNotFound
            })
    }

    fn expectations_key(&self, job: &TrainingJob, svc: &Service) -> Option<String> {
        let Some(replica_type) = svc.labels().get(REPLICA_TYPE_LABEL_KEY) else {
            info!(
                endpoint = %svc.name_any(),
                job = %job.name_any(),
                "endpoint has no replica type label"
            );
            return None;
        };
        match object_key(job) {
            Ok(job_key) => Some(endpoints_key(&job_key, &ReplicaType::new(replica_type.as_str()))),
            Err(e) => {
                warn!(endpoint = %svc.name_any(), error = %e, "couldn't derive job key");
                None
            }
        }
    }

    fn enqueue(&self, job: &TrainingJob) {
        self.queue.enqueue(ObjectRef::from_obj(job));
    }
}

fn slot_labels_changed(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> bool {
    SLOT_LABELS.iter().any(|key| old.get(*key) != new.get(*key))
}
