//! Endpoint creation against the Kubernetes API
//!
//! The reconciler talks to the cluster only through [`EndpointControl`] so it
//! can be exercised against a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, PostParams};
use kube::{Client, Resource};

#[cfg(test)]
use mockall::automock;

use kubetrain_common::crd::TrainingJob;

use crate::error::EndpointError;

/// Field manager recorded on created endpoints
pub const FIELD_MANAGER: &str = "kubetrain-endpoint-controller";

/// Creates replica endpoints in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EndpointControl: Send + Sync {
    /// Create `endpoint` in `namespace`, owned by `controller_ref`
    async fn create_endpoint(
        &self,
        namespace: &str,
        endpoint: Service,
        controller_ref: &OwnerReference,
    ) -> Result<(), EndpointError>;
}

/// Production [`EndpointControl`] backed by a kube client
pub struct KubeEndpointControl {
    client: Client,
}

impl KubeEndpointControl {
    /// Create a new control using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EndpointControl for KubeEndpointControl {
    async fn create_endpoint(
        &self,
        namespace: &str,
        mut endpoint: Service,
        controller_ref: &OwnerReference,
    ) -> Result<(), EndpointError> {
        validate_controller_ref(controller_ref)?;

        endpoint
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(controller_ref.clone());

        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, &endpoint).await?;
        Ok(())
    }
}

/// Controller owner reference pointing at `job`
pub fn controller_ref_for(job: &TrainingJob) -> Result<OwnerReference, EndpointError> {
    job.controller_owner_ref(&()).ok_or_else(|| {
        EndpointError::InvalidControllerRef("TrainingJob has no name or uid".to_string())
    })
}

/// Check that an owner reference can act as a managing controller reference
pub fn validate_controller_ref(controller_ref: &OwnerReference) -> Result<(), EndpointError> {
    if controller_ref.api_version.is_empty() {
        return Err(EndpointError::InvalidControllerRef(
            "apiVersion is empty".to_string(),
        ));
    }
    if controller_ref.kind.is_empty() {
        return Err(EndpointError::InvalidControllerRef("kind is empty".to_string()));
    }
    if controller_ref.controller != Some(true) {
        return Err(EndpointError::InvalidControllerRef(
            "controller must be true".to_string(),
        ));
    }
    if controller_ref.block_owner_deletion != Some(true) {
        return Err(EndpointError::InvalidControllerRef(
            "blockOwnerDeletion must be true".to_string(),
        ));
    }
    Ok(())
}
