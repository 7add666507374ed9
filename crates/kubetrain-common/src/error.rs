//! Error types shared by kubetrain crates
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the job or context it was raised for.

use thiserror::Error;

/// Main error type for kubetrain operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {job}: {message}")]
    Validation {
        /// Name of the job with invalid configuration
        job: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.replicaSpecs.worker.ports")
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a validation error with job context and field path
    pub fn validation_for_field(
        job: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            job: job.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors require a spec change.
    /// Kubernetes errors are retryable unless the API rejected the request (4xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the job name if this error is associated with a specific job
    pub fn job(&self) -> Option<&str> {
        match self {
            Error::Validation { job, .. } => Some(job),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
