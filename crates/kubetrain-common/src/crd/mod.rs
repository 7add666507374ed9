//! Custom Resource Definitions for kubetrain

mod training_job;

pub use training_job::{ReplicaSpec, ReplicaType, TrainingJob, TrainingJobSpec, MAX_REPLICAS};
