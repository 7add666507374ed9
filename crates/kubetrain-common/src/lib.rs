//! Common types for kubetrain: CRDs, errors, events, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for kubetrain custom resources
pub const API_GROUP: &str = "kubetrain.dev";

/// Label key marking objects managed by kubetrain
///
/// The value is always [`API_GROUP`]. Watches on endpoints select on this label.
pub const GROUP_LABEL_KEY: &str = "kubetrain.dev/group";

/// Label key carrying the owning TrainingJob name
pub const JOB_NAME_LABEL_KEY: &str = "kubetrain.dev/job-name";

/// Label key carrying the lowercase replica type (role) of an object
pub const REPLICA_TYPE_LABEL_KEY: &str = "kubetrain.dev/replica-type";

/// Label key carrying the replica index of an object
pub const REPLICA_INDEX_LABEL_KEY: &str = "kubetrain.dev/replica-index";

/// Label selector matching every kubetrain-managed object
pub const MANAGED_LABEL_SELECTOR: &str = "kubetrain.dev/group=kubetrain.dev";

/// Name of the port every replica endpoint exposes
pub const DEFAULT_PORT_NAME: &str = "kubetrain-port";

/// Port assigned to [`DEFAULT_PORT_NAME`] when a replica spec declares no ports
pub const DEFAULT_PORT: u16 = 2222;
