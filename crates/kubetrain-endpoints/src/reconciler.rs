//! Per-role endpoint reconciliation
//!
//! For one job and one replica type, compares the desired replica count with
//! the endpoints in the cache and creates the missing ones. A role with
//! creations still in flight is left alone until the watch catches up or the
//! expectation expires.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use kubetrain_common::crd::{ReplicaSpec, ReplicaType, TrainingJob};
use kubetrain_common::events::{actions, reasons, EventPublisher};
use kubetrain_common::kube_utils::object_key;

use crate::builder::{build_endpoint, resolve_port};
use crate::classifier::{filter_for_replica_type, slice_endpoints, SlotDecision};
use crate::control::{controller_ref_for, EndpointControl};
use crate::error::EndpointError;
use crate::expectations::{endpoints_key, ControllerExpectations};

/// What a single `reconcile_role` pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleOutcome {
    /// Indices an endpoint was requested for
    pub created: Vec<usize>,
    /// Indices claimed by more than one endpoint
    pub excess: Vec<usize>,
    /// The pass was skipped because earlier creations are unobserved
    pub awaiting_expectations: bool,
}

/// Reconciles the endpoints of one role at a time
pub struct EndpointReconciler {
    control: Arc<dyn EndpointControl>,
    expectations: Arc<ControllerExpectations>,
    events: Arc<dyn EventPublisher>,
    /// Surplus per slot last reported, keyed like the expectations
    reported_excess: DashMap<String, BTreeMap<usize, usize>>,
}

impl EndpointReconciler {
    pub fn new(
        control: Arc<dyn EndpointControl>,
        expectations: Arc<ControllerExpectations>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            control,
            expectations,
            events,
            reported_excess: DashMap::new(),
        }
    }

    /// The expectations store shared with the notification router
    pub fn expectations(&self) -> &Arc<ControllerExpectations> {
        &self.expectations
    }

    /// Bring the endpoints of `replica_type` in line with `spec.replicas`
    ///
    /// `observed` is the cache snapshot of the job's endpoints; endpoints of
    /// other roles are ignored. Stops at the first failed creation.
    pub async fn reconcile_role(
        &self,
        job: &TrainingJob,
        observed: &[Arc<Service>],
        replica_type: &ReplicaType,
        spec: &ReplicaSpec,
    ) -> Result<RoleOutcome, EndpointError> {
        let job_key = object_key(job).map_err(EndpointError::KeyDerivation)?;
        let key = endpoints_key(&job_key, replica_type);

        if !self.expectations.satisfied(&key) {
            debug!(job = %job_key, replica_type = %replica_type, "waiting for endpoint creations to be observed");
            return Ok(RoleOutcome {
                awaiting_expectations: true,
                ..Default::default()
            });
        }

        let endpoints = filter_for_replica_type(observed, replica_type);
        let slices = slice_endpoints(&endpoints, spec.replicas as usize);

        let mut excess = BTreeMap::new();
        let mut missing = Vec::new();
        for (index, bucket) in slices.iter().enumerate() {
            match SlotDecision::for_bucket(bucket) {
                SlotDecision::Present => {}
                SlotDecision::Excess(count) => {
                    excess.insert(index, count);
                }
                SlotDecision::Missing => missing.push(index),
            }
        }

        self.report_excess(job, &job_key, &key, replica_type, &excess)
            .await;

        let mut outcome = RoleOutcome {
            excess: excess.into_keys().collect(),
            ..Default::default()
        };
        for index in missing {
            self.create_endpoint(job, &key, replica_type, index, spec)
                .await?;
            outcome.created.push(index);
        }

        Ok(outcome)
    }

    /// Forget the surplus already reported for a job's roles
    pub fn forget_job(&self, job_key: &str) {
        let prefix = format!("{}/", job_key);
        self.reported_excess.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Warn about surplus endpoints, once per change in a slot's count.
    /// Surplus endpoints are reported, not removed.
    async fn report_excess(
        &self,
        job: &TrainingJob,
        job_key: &str,
        key: &str,
        replica_type: &ReplicaType,
        excess: &BTreeMap<usize, usize>,
    ) {
        let previous = if excess.is_empty() {
            self.reported_excess.remove(key).map(|(_, v)| v)
        } else {
            self.reported_excess.insert(key.to_string(), excess.clone())
        }
        .unwrap_or_default();

        for (&index, &count) in excess {
            if previous.get(&index) == Some(&count) {
                debug!(job = %job_key, replica_type = %replica_type, index, count, "endpoint surplus unchanged");
                continue;
            }
            warn!(
                job = %job_key,
                replica_type = %replica_type,
                index,
                count,
                "more than one endpoint for replica"
            );
            self.events
                .publish(
                    &job.object_ref(&()),
                    EventType::Warning,
                    reasons::TOO_MANY_SERVICES,
                    actions::RECONCILE,
                    Some(format!(
                        "{} endpoints exist for {} replica {}",
                        count, replica_type, index
                    )),
                )
                .await;
        }
    }

    async fn create_endpoint(
        &self,
        job: &TrainingJob,
        key: &str,
        replica_type: &ReplicaType,
        index: usize,
        spec: &ReplicaSpec,
    ) -> Result<(), EndpointError> {
        let namespace = job.namespace().ok_or(EndpointError::MissingNamespace)?;
        let port = resolve_port(spec, replica_type)?;
        let endpoint = build_endpoint(job, replica_type, index, port)?;
        let controller_ref = controller_ref_for(job)?;
        let name = endpoint.name_any();

        self.expectations.expect_creations(key, 1)?;

        match self
            .control
            .create_endpoint(&namespace, endpoint, &controller_ref)
            .await
        {
            Ok(()) => {
                info!(job = %job.name_any(), endpoint = %name, "created endpoint");
                self.events
                    .publish(
                        &job.object_ref(&()),
                        EventType::Normal,
                        reasons::SUCCESSFUL_CREATE_SERVICE,
                        actions::CREATE,
                        Some(format!("Created service: {}", name)),
                    )
                    .await;
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                // The create may still land; the watch or the expiry settles it
                warn!(job = %job.name_any(), endpoint = %name, error = %e, "endpoint creation timed out");
                Ok(())
            }
            Err(e) => {
                self.expectations.creation_observed(key);
                self.events
                    .publish(
                        &job.object_ref(&()),
                        EventType::Warning,
                        reasons::FAILED_CREATE_SERVICE,
                        actions::CREATE,
                        Some(format!("Error creating service {}: {}", name, e)),
                    )
                    .await;
                Err(e)
            }
        }
    }
}
