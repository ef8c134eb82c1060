//! Operational errors raised by authenticators
//!
//! A rejected token is never an error. These variants describe an
//! authenticator that could not reach a verdict at all.

use thiserror::Error;

/// Errors that prevent an authenticator from reaching a verdict
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authenticator endpoint could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// The webhook answered with a non-success HTTP status
    #[error("webhook returned HTTP {status}")]
    BadStatus {
        /// HTTP status code returned by the webhook
        status: u16,
    },

    /// The webhook answered with a body that is not a usable TokenReview
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No key set is currently published for the issuer
    #[error("no JWKS available for issuer {issuer}")]
    UnknownIssuer {
        /// Issuer URL that had no published keys
        issuer: String,
    },

    /// The authenticator could not be constructed from its configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller abandoned the request before a verdict was reached
    #[error("authentication cancelled")]
    Cancelled,
}

impl AuthError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error was caused by caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for authenticator operations
pub type Result<T, E = AuthError> = std::result::Result<T, E>;
