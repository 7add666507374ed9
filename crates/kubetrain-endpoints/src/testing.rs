//! Fixtures shared by the unit tests of this crate

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Service};
use kube::runtime::events::EventType;

use kubetrain_common::crd::{ReplicaSpec, ReplicaType, TrainingJob, TrainingJobSpec};
use kubetrain_common::events::EventPublisher;

use crate::builder::build_endpoint;
use crate::control::controller_ref_for;

pub const NAMESPACE: &str = "ml";

/// A TrainingJob in [`NAMESPACE`] with the given roles
pub fn sample_job(name: &str, roles: &[(&str, u32)]) -> TrainingJob {
    let replica_specs: BTreeMap<ReplicaType, ReplicaSpec> = roles
        .iter()
        .map(|(rt, n)| (ReplicaType::from(*rt), ReplicaSpec::with_replicas(*n)))
        .collect();
    let mut job = TrainingJob::new(name, TrainingJobSpec { replica_specs });
    job.metadata.namespace = Some(NAMESPACE.to_string());
    job.metadata.uid = Some(format!("uid-{}", name));
    job.metadata.resource_version = Some("1".to_string());
    job
}

/// The endpoint the reconciler would create for a slot, as seen in the cache
pub fn observed_endpoint(job: &TrainingJob, replica_type: &str, index: usize) -> Arc<Service> {
    Arc::new(owned_endpoint(job, replica_type, index, "1"))
}

/// Endpoint for a slot with the job's controller reference and a resource version
pub fn owned_endpoint(
    job: &TrainingJob,
    replica_type: &str,
    index: usize,
    resource_version: &str,
) -> Service {
    let mut svc = build_endpoint(job, &ReplicaType::from(replica_type), index, 2222)
        .expect("fixture endpoint");
    svc.metadata.owner_references =
        Some(vec![controller_ref_for(job).expect("fixture controller ref")]);
    svc.metadata.resource_version = Some(resource_version.to_string());
    svc
}

/// Event publisher that remembers the reasons it was asked to publish
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| matches!(t, EventType::Warning))
            .map(|(_, reason)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().unwrap().push((type_, reason.to_string()));
    }
}
