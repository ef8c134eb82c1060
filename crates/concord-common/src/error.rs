//! Error types for the Concord broker
//!
//! Errors carry enough structure (field paths, resource kinds, context) to
//! be logged usefully from controllers and startup code.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Concord operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid resource or request content
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.issuer")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid operator configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the bad setting
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "informer", "controller", "server")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a specific field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
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
    /// Validation, serialization and configuration errors need a human to fix
    /// the input. Kubernetes 4xx responses are treated the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Configuration { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the field path if this is a field-level validation error
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => field.as_deref(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_field_paths() {
        let err = Error::validation_for_field("spec.issuer", "must be an https URL");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("https URL"));
        assert_eq!(err.field(), Some("spec.issuer"));
        assert!(!err.is_retryable());

        assert_eq!(Error::validation("bad").field(), None);
    }

    #[test]
    fn internal_errors_are_retryable_and_keep_context() {
        let err = Error::internal_with_context("informer", "watch stream ended");
        assert!(err.to_string().contains("[informer]"));
        assert_eq!(err.context(), Some("informer"));
        assert!(err.is_retryable());

        let err = Error::internal("boom");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!Error::serialization("invalid json").is_retryable());
        assert!(!Error::serialization_for_kind("Secret", "invalid json").is_retryable());
        assert!(!Error::configuration("missing CA key").is_retryable());
    }

    #[test]
    fn kube_client_errors_are_not_retryable() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"s1\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(!Error::from(not_found).is_retryable());

        let unavailable = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "etcd leader changed".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        });
        assert!(Error::from(unavailable).is_retryable());
    }
}
