//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, object keys, label selector matching, and owner
//! reference helpers used by the controllers.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Stable work-queue key for an object: `<namespace>/<name>`, or `<name>`
/// for objects without a namespace.
///
/// Fails if the object has no name.
pub fn object_key<K: Resource>(obj: &K) -> Result<String, Error> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::internal_with_context("object_key", "object has no metadata.name")
        })?;
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Ok(format!("{}/{}", ns, name)),
        _ => Ok(name.to_string()),
    }
}

/// Check whether a label set satisfies an equality-based selector
///
/// Every selector entry must be present with the same value. An empty
/// selector matches everything, including objects without labels.
pub fn selector_matches(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|l| l.get(key))
            .map(|v| v == value)
            .unwrap_or(false)
    })
}

/// Return the owner reference marked as managing controller, if any
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Generate the name of a per-replica object: `<job>-<replicaType>-<index>`
///
/// Any `/` is replaced with `-` so the result is usable as an object name.
pub fn general_name(job_name: &str, replica_type: &str, index: usize) -> String {
    format!("{}-{}-{}", job_name, replica_type, index).replace('/', "-")
}
