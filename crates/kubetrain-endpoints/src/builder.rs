//! Headless Service construction for replica endpoints

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use kubetrain_common::crd::{ReplicaSpec, ReplicaType, TrainingJob};
use kubetrain_common::kube_utils::general_name;
use kubetrain_common::{
    API_GROUP, DEFAULT_PORT_NAME, GROUP_LABEL_KEY, JOB_NAME_LABEL_KEY, REPLICA_INDEX_LABEL_KEY,
    REPLICA_TYPE_LABEL_KEY,
};

use crate::error::EndpointError;

/// Labels shared by every kubetrain object of a job
pub fn job_labels(job_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (GROUP_LABEL_KEY.to_string(), API_GROUP.to_string()),
        (JOB_NAME_LABEL_KEY.to_string(), job_name.replace('/', "-")),
    ])
}

/// Labels identifying one replica of one role
pub fn replica_labels(
    job_name: &str,
    replica_type: &ReplicaType,
    index: usize,
) -> BTreeMap<String, String> {
    let mut labels = job_labels(job_name);
    labels.insert(REPLICA_TYPE_LABEL_KEY.to_string(), replica_type.canonical());
    labels.insert(REPLICA_INDEX_LABEL_KEY.to_string(), index.to_string());
    labels
}

/// Port the role's endpoints publish
pub fn resolve_port(spec: &ReplicaSpec, replica_type: &ReplicaType) -> Result<u16, EndpointError> {
    spec.endpoint_port()
        .ok_or_else(|| EndpointError::PortNotFound {
            replica_type: replica_type.canonical(),
            port_name: DEFAULT_PORT_NAME.to_string(),
        })
}

/// Build the headless Service for replica `index` of `replica_type`
///
/// The selector equals the labels, so the Service resolves to exactly the
/// replica's pod. Owner references are attached at creation time.
pub fn build_endpoint(
    job: &TrainingJob,
    replica_type: &ReplicaType,
    index: usize,
    port: u16,
) -> Result<Service, EndpointError> {
    let namespace = job.namespace().ok_or(EndpointError::MissingNamespace)?;
    let job_name = job.name_any();
    let labels = replica_labels(&job_name, replica_type, index);

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(general_name(&job_name, &replica_type.canonical(), index)),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(DEFAULT_PORT_NAME.to_string()),
                port: i32::from(port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
