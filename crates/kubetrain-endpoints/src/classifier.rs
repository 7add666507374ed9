//! Endpoint classification by replica type and index
//!
//! Pure functions over a cache snapshot. Malformed endpoints are skipped with
//! a warning and never reach a bucket.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::warn;

use kubetrain_common::crd::ReplicaType;
use kubetrain_common::{REPLICA_INDEX_LABEL_KEY, REPLICA_TYPE_LABEL_KEY};

/// What a single replica slot needs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDecision {
    /// No endpoint exists for the slot
    Missing,
    /// Exactly one endpoint exists
    Present,
    /// More than one endpoint claims the slot (carries the count)
    Excess(usize),
}

impl SlotDecision {
    /// Decide a slot from its bucket
    pub fn for_bucket(bucket: &[Arc<Service>]) -> Self {
        match bucket.len() {
            0 => SlotDecision::Missing,
            1 => SlotDecision::Present,
            n => SlotDecision::Excess(n),
        }
    }
}

/// Keep the endpoints whose replica-type label equals the canonical role
pub fn filter_for_replica_type(
    endpoints: &[Arc<Service>],
    replica_type: &ReplicaType,
) -> Vec<Arc<Service>> {
    let rt = replica_type.canonical();
    endpoints
        .iter()
        .filter(|svc| {
            svc.labels()
                .get(REPLICA_TYPE_LABEL_KEY)
                .is_some_and(|v| *v == rt)
        })
        .cloned()
        .collect()
}

/// Bucket endpoints by their replica-index label into exactly `replicas` slots
///
/// Bucket order is index order and each bucket keeps input order. Endpoints
/// without an index label, with a non-integer index, or with an index outside
/// `[0, replicas)` are dropped.
pub fn slice_endpoints(endpoints: &[Arc<Service>], replicas: usize) -> Vec<Vec<Arc<Service>>> {
    let mut buckets: Vec<Vec<Arc<Service>>> = vec![Vec::new(); replicas];

    for svc in endpoints {
        let name = svc.name_any();
        let Some(raw) = svc.labels().get(REPLICA_INDEX_LABEL_KEY) else {
            warn!(endpoint = %name, "endpoint has no replica index label, skipping");
            continue;
        };
        let index = match raw.parse::<i64>() {
            Ok(i) => i,
            Err(e) => {
                warn!(endpoint = %name, index = %raw, error = %e, "replica index is not an integer, skipping");
                continue;
            }
        };
        match usize::try_from(index).ok().filter(|i| *i < replicas) {
            Some(i) => buckets[i].push(Arc::clone(svc)),
            None => {
                warn!(endpoint = %name, index, replicas, "replica index out of range, skipping");
            }
        }
    }

    buckets
}
