//! TrainingJob CRD types
//!
//! A `TrainingJob` describes a distributed training workload as a set of
//! roles (replica types such as `ps`, `worker`, `chief`), each with a replica
//! count and the ports its replicas listen on. The endpoint controller keeps
//! one headless Service per (role, index) so replicas can reach each other by
//! stable DNS name.

use std::collections::{BTreeMap, BTreeSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kube_utils::general_name;
use crate::{Error, DEFAULT_PORT, DEFAULT_PORT_NAME};

/// Maximum length of a Service name (DNS-1035 label)
const MAX_ENDPOINT_NAME_LEN: usize = 63;

/// Upper bound on replicas per role; keep in sync with the schema range
pub const MAX_REPLICAS: u32 = 1000;

// =============================================================================
// ReplicaType
// =============================================================================

/// A role within a TrainingJob (e.g. "PS", "Worker", "Chief")
///
/// Role names are case-insensitive. The spec keeps whatever casing the user
/// wrote; every label value, object name, and expectations key uses the
/// lowercase [`canonical`](Self::canonical) form.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ReplicaType(String);

impl ReplicaType {
    /// Create a replica type from its name as written in the spec
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as written in the spec
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for labels, names, and keys
    pub fn canonical(&self) -> String {
        self.0.to_lowercase()
    }
}

impl From<&str> for ReplicaType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for ReplicaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// =============================================================================
// ReplicaSpec
// =============================================================================

/// Desired state for one role of a TrainingJob
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    /// Number of replicas for this role
    #[serde(default = "default_one")]
    #[schemars(range(max = 1000))]
    pub replicas: u32,

    /// Named ports exposed by every replica of this role.
    /// The endpoint Service publishes the port named `kubetrain-port`.
    #[serde(default = "default_ports")]
    pub ports: BTreeMap<String, u16>,
}

impl Default for ReplicaSpec {
    fn default() -> Self {
        Self {
            replicas: default_one(),
            ports: default_ports(),
        }
    }
}

impl ReplicaSpec {
    /// Create a spec with the given replica count and the default port
    pub fn with_replicas(replicas: u32) -> Self {
        Self {
            replicas,
            ..Default::default()
        }
    }

    /// Port the replica endpoint must expose, if declared
    pub fn endpoint_port(&self) -> Option<u16> {
        self.ports.get(DEFAULT_PORT_NAME).copied()
    }
}

fn default_one() -> u32 {
    1
}

fn default_ports() -> BTreeMap<String, u16> {
    BTreeMap::from([(DEFAULT_PORT_NAME.to_string(), DEFAULT_PORT)])
}

// =============================================================================
// CRD
// =============================================================================

/// Distributed training job whose replicas address each other through
/// per-replica headless Services
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubetrain.dev",
    version = "v1alpha1",
    kind = "TrainingJob",
    plural = "trainingjobs",
    shortname = "tj",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobSpec {
    /// Roles of the job, keyed by replica type
    #[serde(default)]
    pub replica_specs: BTreeMap<ReplicaType, ReplicaSpec>,
}

impl TrainingJobSpec {
    /// Validate the spec for a job with the given name
    ///
    /// Checks that roles exist, that role names are usable in object names
    /// and labels, that no two roles collide case-insensitively, and that
    /// every generated endpoint name fits in a DNS label.
    pub fn validate(&self, job_name: &str) -> Result<(), Error> {
        if self.replica_specs.is_empty() {
            return Err(Error::validation_for_field(
                job_name,
                "spec.replicaSpecs",
                "at least one replica type is required",
            ));
        }

        let mut seen = BTreeSet::new();
        for (rtype, spec) in &self.replica_specs {
            let rt = rtype.canonical();
            let field = format!("spec.replicaSpecs.{}", rtype.as_str());

            if !is_dns_label_fragment(&rt) {
                return Err(Error::validation_for_field(
                    job_name,
                    field,
                    format!(
                        "replica type '{}' must be non-empty alphanumerics or '-'",
                        rtype.as_str()
                    ),
                ));
            }
            if !seen.insert(rt.clone()) {
                return Err(Error::validation_for_field(
                    job_name,
                    field,
                    format!("replica type '{}' is declared more than once", rt),
                ));
            }
            if spec.replicas > MAX_REPLICAS {
                return Err(Error::validation_for_field(
                    job_name,
                    format!("{field}.replicas"),
                    format!(
                        "{} replicas exceeds the maximum of {}",
                        spec.replicas, MAX_REPLICAS
                    ),
                ));
            }
            if spec.replicas > 0 {
                let longest = general_name(job_name, &rt, spec.replicas as usize - 1);
                if longest.len() > MAX_ENDPOINT_NAME_LEN {
                    return Err(Error::validation_for_field(
                        job_name,
                        field,
                        format!(
                            "endpoint name '{}' exceeds {} characters",
                            longest, MAX_ENDPOINT_NAME_LEN
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_dns_label_fragment(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn spec_with(roles: &[(&str, u32)]) -> TrainingJobSpec {
        TrainingJobSpec {
            replica_specs: roles
                .iter()
                .map(|(rt, n)| (ReplicaType::from(*rt), ReplicaSpec::with_replicas(*n)))
                .collect(),
        }
    }

    #[test]
    fn replica_type_canonicalizes_to_lowercase() {
        let rt = ReplicaType::from("Worker");
        assert_eq!(rt.as_str(), "Worker");
        assert_eq!(rt.canonical(), "worker");
        assert_eq!(rt.to_string(), "worker");
    }

    #[test]
    fn replica_spec_defaults() {
        let spec = ReplicaSpec::default();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.endpoint_port(), Some(DEFAULT_PORT));
    }

    #[test]
    fn replica_spec_without_named_port_has_no_endpoint_port() {
        let spec = ReplicaSpec {
            replicas: 2,
            ports: BTreeMap::from([("grpc".to_string(), 9000)]),
        };
        assert_eq!(spec.endpoint_port(), None);
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let yaml = r#"
replicaSpecs:
  PS:
    replicas: 2
  Worker:
    ports:
      kubetrain-port: 3333
"#;
        let spec: TrainingJobSpec = serde_yaml::from_str(yaml).unwrap();
        let ps = &spec.replica_specs[&ReplicaType::from("PS")];
        assert_eq!(ps.replicas, 2);
        assert_eq!(ps.endpoint_port(), Some(DEFAULT_PORT));

        let worker = &spec.replica_specs[&ReplicaType::from("Worker")];
        assert_eq!(worker.replicas, 1);
        assert_eq!(worker.endpoint_port(), Some(3333));
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec_with(&[("PS", 2), ("Worker", 4)]).validate("mnist").is_ok());
    }

    #[test]
    fn zero_replicas_is_valid() {
        assert!(spec_with(&[("Worker", 0)]).validate("mnist").is_ok());
    }

    #[test]
    fn empty_spec_is_rejected() {
        let err = TrainingJobSpec::default().validate("mnist").unwrap_err();
        assert!(err.to_string().contains("at least one replica type"));
    }

    #[test]
    fn case_colliding_replica_types_are_rejected() {
        let err = spec_with(&[("Worker", 1), ("worker", 1)])
            .validate("mnist")
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn replica_type_with_invalid_characters_is_rejected() {
        for bad in ["", "work_er", "-ps", "ps-", "a.b"] {
            assert!(
                spec_with(&[(bad, 1)]).validate("mnist").is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn overlong_endpoint_names_are_rejected() {
        let long_name = "j".repeat(55);
        let err = spec_with(&[("worker", 10)])
            .validate(&long_name)
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 63"));
    }

    #[test]
    fn replica_count_is_bounded() {
        assert!(spec_with(&[("w", MAX_REPLICAS)]).validate("a").is_ok());

        // Short names would otherwise let an enormous count through
        let err = spec_with(&[("w", u32::MAX)]).validate("a").unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.replicaSpecs.w.replicas"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(spec_with(&[("w", MAX_REPLICAS + 1)]).validate("a").is_err());
    }

    #[test]
    fn crd_schema_bounds_replicas() {
        let schema = serde_json::to_string(&TrainingJob::crd()).unwrap();
        assert!(schema.contains(r#""maximum":1000.0"#), "{schema}");
    }

    #[test]
    fn job_serializes_with_api_version_and_kind() {
        let job = TrainingJob::new("train1", spec_with(&[("Worker", 2)]));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["apiVersion"], "kubetrain.dev/v1alpha1");
        assert_eq!(value["kind"], "TrainingJob");
        assert_eq!(value["spec"]["replicaSpecs"]["Worker"]["replicas"], 2);
    }

    #[test]
    fn crd_is_namespaced_in_kubetrain_group() {
        let crd = TrainingJob::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("trainingjobs.kubetrain.dev"));
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.group, "kubetrain.dev");
    }
}
