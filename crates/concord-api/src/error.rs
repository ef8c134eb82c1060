//! Errors returned from the credential request boundary
//!
//! Every variant renders as a Kubernetes `Status` object so that kubectl and
//! client-go surface them the same way they surface apiserver errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use concord_common::LOGIN_API_GROUP;

use crate::types::KIND;

/// Result type for the credential request API
pub type Result<T> = std::result::Result<T, ApiError>;

/// Why a single field was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// A required field was empty or absent
    Required,
    /// A field held a value that is not acceptable
    Invalid,
    /// A field held a value this server does not support
    NotSupported,
}

impl FieldErrorKind {
    /// Kubernetes `StatusCause.reason` for this kind
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Required => "FieldValueRequired",
            Self::Invalid => "FieldValueInvalid",
            Self::NotSupported => "FieldValueNotSupported",
        }
    }
}

/// A rejected field with its path and explanation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Kind of rejection
    pub kind: FieldErrorKind,
    /// Dotted field path (e.g., "spec.token.value")
    pub field: String,
    /// The rejected value, rendered for display
    pub value: Option<String>,
    /// Human readable explanation
    pub detail: String,
}

impl FieldError {
    /// A required field is missing
    pub fn required(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Required,
            field: field.into(),
            value: None,
            detail: detail.into(),
        }
    }

    /// A field holds an unacceptable value
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: FieldErrorKind::Invalid,
            field: field.into(),
            value: Some(value.into()),
            detail: detail.into(),
        }
    }

    /// A field holds a value that is not supported
    pub fn not_supported(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::NotSupported,
            field: field.into(),
            value: Some(value.into()),
            detail: String::new(),
        }
    }

    /// Message in the apiserver's `field: Reason: detail` format
    pub fn message(&self) -> String {
        let mut message = match self.kind {
            FieldErrorKind::Required => "Required value".to_string(),
            FieldErrorKind::Invalid => format!(
                "Invalid value: {:?}",
                self.value.as_deref().unwrap_or_default()
            ),
            FieldErrorKind::NotSupported => format!(
                "Unsupported value: {:?}",
                self.value.as_deref().unwrap_or_default()
            ),
        };
        if !self.detail.is_empty() {
            message.push_str(": ");
            message.push_str(&self.detail);
        }
        message
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message())
    }
}

/// Error type for the credential request API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request failed field validation
    #[error("{}.{} {:?} is invalid: {}", KIND, LOGIN_API_GROUP, .name, join_causes(.causes))]
    Invalid {
        /// Name of the rejected object
        name: String,
        /// Per-field rejections
        causes: Vec<FieldError>,
    },

    /// The request body could not be decoded
    #[error("{0}")]
    BadRequest(String),

    /// A pre-flight validator refused the request
    #[error("{0}")]
    Forbidden(String),

    /// Unexpected server-side failure
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_causes(causes: &[FieldError]) -> String {
    let rendered: Vec<String> = causes.iter().map(ToString::to_string).collect();
    if rendered.len() == 1 {
        rendered.concat()
    } else {
        format!("[{}]", rendered.join(", "))
    }
}

impl ApiError {
    /// A field validation error for the named object
    pub fn invalid(name: impl Into<String>, causes: Vec<FieldError>) -> Self {
        Self::Invalid {
            name: name.into(),
            causes,
        }
    }

    /// Field errors carried by this error
    pub fn causes(&self) -> &[FieldError] {
        match self {
            Self::Invalid { causes, .. } => causes,
            _ => &[],
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kubernetes `Status.reason` for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "Invalid",
            Self::BadRequest(_) => "BadRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Render as a Kubernetes `Status` object
    pub fn to_status(&self) -> serde_json::Value {
        let code = self.status_code().as_u16();
        let mut status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": code
        });

        if let Self::Invalid { name, causes } = self {
            let causes: Vec<serde_json::Value> = causes
                .iter()
                .map(|c| {
                    json!({
                        "reason": c.kind.reason(),
                        "message": c.message(),
                        "field": c.field
                    })
                })
                .collect();
            status["details"] = json!({
                "name": name,
                "group": LOGIN_API_GROUP,
                "kind": KIND,
                "causes": causes
            });
        }

        status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.to_status())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_messages_follow_apiserver_format() {
        let required = FieldError::required("spec.token.value", "token must be supplied");
        assert_eq!(
            required.to_string(),
            "spec.token.value: Required value: token must be supplied"
        );

        let invalid = FieldError::invalid("spec.type", "Password", "unrecognized type");
        assert_eq!(
            invalid.to_string(),
            "spec.type: Invalid value: \"Password\": unrecognized type"
        );

        let unsupported = FieldError::not_supported("dryRun", "All");
        assert_eq!(unsupported.to_string(), "dryRun: Unsupported value: \"All\"");
    }

    #[test]
    fn invalid_renders_status_with_causes() {
        let err = ApiError::invalid(
            "login",
            vec![FieldError::required("spec.type", "type must be supplied")],
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let status = err.to_status();
        assert_eq!(status["kind"], "Status");
        assert_eq!(status["status"], "Failure");
        assert_eq!(status["reason"], "Invalid");
        assert_eq!(status["code"], 422);
        assert_eq!(status["details"]["name"], "login");
        assert_eq!(status["details"]["causes"][0]["field"], "spec.type");
        assert_eq!(
            status["details"]["causes"][0]["reason"],
            "FieldValueRequired"
        );
        assert!(status["message"]
            .as_str()
            .unwrap()
            .contains("is invalid: spec.type: Required value"));
    }

    #[test]
    fn multiple_causes_are_bracketed() {
        let err = ApiError::invalid(
            "",
            vec![
                FieldError::required("a", "x"),
                FieldError::required("b", "y"),
            ],
        );
        assert!(err
            .to_string()
            .ends_with("[a: Required value: x, b: Required value: y]"));
    }

    #[test]
    fn bad_request_has_no_details() {
        let status = ApiError::BadRequest("unexpected end of input".to_string()).to_status();
        assert_eq!(status["code"], 400);
        assert_eq!(status["reason"], "BadRequest");
        assert!(status.get("details").is_none());
    }
}
