//! TrainingJob endpoint controller
//!
//! Level-triggered: every pass recomputes from the job spec and the current
//! endpoint cache, one role at a time in replica type order. Jobs are
//! requeued after a resync period since an expired expectation produces no
//! watch event of its own.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::Store;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, instrument, warn};

use kubetrain_common::crd::TrainingJob;
use kubetrain_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use kubetrain_common::kube_utils::{object_key, selector_matches};

use crate::builder::job_labels;
use crate::control::{EndpointControl, KubeEndpointControl, FIELD_MANAGER};
use crate::error::EndpointError;
use crate::expectations::ControllerExpectations;
use crate::reconciler::EndpointReconciler;

/// Default period between passes over an unchanged job
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(30);

/// Shared context for the endpoint controller
pub struct EndpointContext {
    pub reconciler: EndpointReconciler,
    pub expectations: Arc<ControllerExpectations>,
    pub endpoints: Store<Service>,
    pub events: Arc<dyn EventPublisher>,
    pub resync: Duration,
}

impl EndpointContext {
    /// Create a context that talks to the cluster through `client`
    pub fn new(
        client: Client,
        expectations: Arc<ControllerExpectations>,
        endpoints: Store<Service>,
        resync: Duration,
    ) -> Self {
        Self::from_parts(
            Arc::new(KubeEndpointControl::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
            expectations,
            endpoints,
            resync,
        )
    }

    /// Assemble a context from explicit collaborators
    pub fn from_parts(
        control: Arc<dyn EndpointControl>,
        events: Arc<dyn EventPublisher>,
        expectations: Arc<ControllerExpectations>,
        endpoints: Store<Service>,
        resync: Duration,
    ) -> Self {
        Self {
            reconciler: EndpointReconciler::new(
                control,
                Arc::clone(&expectations),
                Arc::clone(&events),
            ),
            expectations,
            endpoints,
            events,
            resync,
        }
    }
}

/// Reconcile the endpoints of every role of a TrainingJob
#[instrument(skip(job, ctx), fields(job = %job.name_any()))]
pub async fn reconcile(
    job: Arc<TrainingJob>,
    ctx: Arc<EndpointContext>,
) -> Result<Action, EndpointError> {
    let job_key = object_key(job.as_ref()).map_err(EndpointError::KeyDerivation)?;

    if job.meta().deletion_timestamp.is_some() {
        debug!("job is being deleted, dropping its expectations");
        ctx.expectations.delete_job_expectations(&job_key);
        ctx.reconciler.forget_job(&job_key);
        return Ok(Action::await_change());
    }

    let name = job.name_any();
    if let Err(e) = job.spec.validate(&name) {
        warn!(error = %e, "invalid TrainingJob spec");
        ctx.events
            .publish(
                &job.object_ref(&()),
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
        return Err(EndpointError::Validation(e));
    }

    let namespace = job.namespace().ok_or(EndpointError::MissingNamespace)?;
    let observed = job_endpoints(&ctx.endpoints, &namespace, &name);

    for (replica_type, spec) in &job.spec.replica_specs {
        let outcome = ctx
            .reconciler
            .reconcile_role(&job, &observed, replica_type, spec)
            .await?;
        debug!(
            replica_type = %replica_type,
            created = ?outcome.created,
            excess = ?outcome.excess,
            awaiting = outcome.awaiting_expectations,
            "reconciled role"
        );
    }

    Ok(Action::requeue(ctx.resync))
}

/// Error policy for TrainingJob reconciliation
pub fn error_policy(
    job: Arc<TrainingJob>,
    error: &EndpointError,
    _ctx: Arc<EndpointContext>,
) -> Action {
    error!(
        ?error,
        job = %job.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        // Requires a spec change to fix
        Action::await_change()
    }
}

/// Endpoints in the cache that belong to the named job
fn job_endpoints(store: &Store<Service>, namespace: &str, job_name: &str) -> Vec<Arc<Service>> {
    let selector = job_labels(job_name);
    store
        .state()
        .into_iter()
        .filter(|svc| svc.namespace().as_deref() == Some(namespace))
        .filter(|svc| selector_matches(svc.metadata.labels.as_ref(), &selector))
        .collect()
}
