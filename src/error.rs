//! Error types for the csi-driver-lvm extension
//!
//! Provides structured error types for the configuration merger, the
//! resource set builder, the managed-resource synchronizer and the
//! lifecycle actuator.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the extension controller
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("failed to decode provider config: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Build Errors
    // =========================================================================
    #[error("failed to find {name} image: {reason}")]
    ImageResolution { name: String, reason: String },

    // =========================================================================
    // Managed Resource Errors
    // =========================================================================
    #[error("failed to serialize managed resource bundle: {0}")]
    Serialization(String),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("managed resource {namespace}/{name} was not deleted within {timeout:?}")]
    DeleteTimeout {
        name: String,
        namespace: String,
        timeout: Duration,
    },

    #[error("managed resource {namespace}/{name} did not become healthy within {timeout:?}")]
    HealthTimeout {
        name: String,
        namespace: String,
        timeout: Duration,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Api(_) | Error::Io(_) | Error::Cancelled { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Deletion still in progress - give the resource manager time
            Error::DeleteTimeout { .. } | Error::HealthTimeout { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Image vector may be fixed by a rollout of the operator
            Error::ImageResolution { .. } => ErrorAction::RequeueAfter(Duration::from_secs(300)),

            // Configuration/validation errors - don't retry automatically
            Error::Decode(_)
            | Error::InvalidConfiguration(_)
            | Error::Configuration(_)
            | Error::Serialization(_) => ErrorAction::NoRequeue,

            Error::Internal(_) => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Short machine-readable name of the error kind, recorded in the
    /// Extension status.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Decode(_) => "DecodeError",
            Error::InvalidConfiguration(_) | Error::Configuration(_) => "ConfigurationError",
            Error::ImageResolution { .. } => "ImageResolutionError",
            Error::Serialization(_) => "SerializationError",
            Error::Api(_) => "APIError",
            Error::DeleteTimeout { .. } => "DeleteTimeoutError",
            Error::HealthTimeout { .. } => "HealthTimeoutError",
            Error::Cancelled { .. } => "CancellationError",
            Error::Internal(_) | Error::Io(_) => "InternalError",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias for the extension
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::DeleteTimeout {
            name: "extension-csi-driver-lvm".into(),
            namespace: "kube-system".into(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(30))
        );

        let err = Error::Decode("unknown field `foo`".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Cancelled {
            operation: "delete".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Internal("boom".into());
        assert!(transient.is_retryable());

        let config_err = Error::InvalidConfiguration("empty hostWritePath".into());
        assert!(!config_err.is_retryable());
    }

    #[test]
    fn test_timeout_and_cancellation_kinds_are_distinct() {
        let timeout = Error::DeleteTimeout {
            name: "mr".into(),
            namespace: "kube-system".into(),
            timeout: Duration::from_secs(120),
        };
        let cancelled = Error::Cancelled {
            operation: "delete".into(),
        };
        assert_eq!(timeout.kind(), "DeleteTimeoutError");
        assert_eq!(cancelled.kind(), "CancellationError");
        assert_ne!(timeout.kind(), Error::Internal("x".into()).kind());
    }

    #[test]
    fn test_image_resolution_message() {
        let err = Error::ImageResolution {
            name: "csi-attacher".into(),
            reason: "not in image vector".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to find csi-attacher image: not in image vector"
        );
    }
}
