//! Endpoint controller error types

use crate::expectations::ExpectationsError;

/// API status reasons the server uses for requests that may still complete
const TIMEOUT_REASONS: [&str; 2] = ["Timeout", "ServerTimeout"];

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Common(#[from] kubetrain_common::Error),

    #[error("expectations error: {0}")]
    Expectations(#[from] ExpectationsError),

    #[error("couldn't derive key: {0}")]
    KeyDerivation(#[source] kubetrain_common::Error),

    #[error("replica type '{replica_type}' declares no port named '{port_name}'")]
    PortNotFound {
        replica_type: String,
        port_name: String,
    },

    #[error("invalid controller reference: {0}")]
    InvalidControllerRef(String),

    #[error("missing namespace on TrainingJob")]
    MissingNamespace,

    #[error("invalid spec: {0}")]
    Validation(#[source] kubetrain_common::Error),
}

impl EndpointError {
    /// True when the API server gave up waiting on a request that may still
    /// take effect. Creations failing this way are treated as provisional
    /// successes; the watch or the expectation expiry settles the outcome.
    pub fn is_timeout(&self) -> bool {
        match self {
            EndpointError::Kube(e) => kube_error_is_timeout(e),
            EndpointError::Common(kubetrain_common::Error::Kube { source }) => {
                kube_error_is_timeout(source)
            }
            _ => false,
        }
    }

    /// Check if this error is worth retrying without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            EndpointError::Kube(e) => {
                kube_error_is_timeout(e)
                    || !matches!(e, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            EndpointError::Common(e) => e.is_retryable(),
            EndpointError::Expectations(ExpectationsError::CapacityExceeded { .. }) => true,
            EndpointError::Expectations(ExpectationsError::MalformedKey(_)) => false,
            EndpointError::KeyDerivation(_)
            | EndpointError::PortNotFound { .. }
            | EndpointError::InvalidControllerRef(_)
            | EndpointError::MissingNamespace
            | EndpointError::Validation(_) => false,
        }
    }
}

fn kube_error_is_timeout(e: &kube::Error) -> bool {
    match e {
        kube::Error::Api(ae) => ae.code == 504 || TIMEOUT_REASONS.contains(&ae.reason.as_str()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn gateway_timeout_is_timeout() {
        assert!(EndpointError::from(api_error(504, "Timeout")).is_timeout());
        assert!(EndpointError::from(api_error(500, "ServerTimeout")).is_timeout());
        assert!(EndpointError::from(api_error(504, "")).is_timeout());
    }

    #[test]
    fn wrapped_common_timeout_is_timeout() {
        let err = EndpointError::Common(api_error(504, "Timeout").into());
        assert!(err.is_timeout());
    }

    #[test]
    fn other_failures_are_not_timeouts() {
        assert!(!EndpointError::from(api_error(409, "AlreadyExists")).is_timeout());
        assert!(!EndpointError::from(api_error(500, "InternalError")).is_timeout());
        assert!(!EndpointError::MissingNamespace.is_timeout());
    }

    /// Story: server trouble is retried, rejected requests wait for a spec change
    #[test]
    fn story_retryability_follows_failure_class() {
        assert!(EndpointError::from(api_error(500, "InternalError")).is_retryable());
        assert!(EndpointError::from(api_error(504, "Timeout")).is_retryable());
        assert!(!EndpointError::from(api_error(422, "Invalid")).is_retryable());

        let err = EndpointError::PortNotFound {
            replica_type: "worker".to_string(),
            port_name: "kubetrain-port".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("kubetrain-port"));

        assert!(EndpointError::from(ExpectationsError::CapacityExceeded { capacity: 1 })
            .is_retryable());
        assert!(!EndpointError::from(ExpectationsError::MalformedKey(String::new()))
            .is_retryable());
        let invalid = kubetrain_common::Error::validation_for_field("train1", "spec", "bad");
        assert!(!EndpointError::Validation(invalid).is_retryable());
    }
}
