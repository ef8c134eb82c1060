//! Pre-flight validation hooks
//!
//! Hooks see a copy of the request after shape validation and may refuse
//! it. They cannot change what the handler goes on to authenticate.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::{ApiError, FieldError, Result};
use crate::types::TokenCredentialRequest;

/// Admission-style check run before authentication
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CreateValidator: Send + Sync {
    /// Refuse the request by returning an error; the error reaches the caller unchanged
    async fn validate(&self, request: TokenCredentialRequest) -> Result<()>;
}

/// Refuses requests that do not name an authenticator
///
/// Without this hook such requests are answered with the generic
/// authentication failure; with it they are refused up front.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequireAuthenticatorRef;

#[async_trait]
impl CreateValidator for RequireAuthenticatorRef {
    async fn validate(&self, request: TokenCredentialRequest) -> Result<()> {
        match &request.spec.authenticator {
            Some(reference) if !reference.name.is_empty() => Ok(()),
            _ => Err(ApiError::invalid(
                request.name(),
                vec![FieldError::required(
                    "spec.authenticator",
                    "authenticator must be supplied",
                )],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::TypedLocalObjectReference;

    #[tokio::test]
    async fn require_authenticator_ref() {
        let hook = RequireAuthenticatorRef;

        let err = hook
            .validate(TokenCredentialRequest::new("abc", None))
            .await
            .unwrap_err();
        assert_eq!(err.causes()[0].field, "spec.authenticator");

        let reference = TypedLocalObjectReference {
            api_group: Some(concord_common::AUTHENTICATION_API_GROUP.to_string()),
            kind: "JWTAuthenticator".to_string(),
            name: "corp".to_string(),
        };
        hook.validate(TokenCredentialRequest::new("abc", Some(reference)))
            .await
            .unwrap();
    }
}
