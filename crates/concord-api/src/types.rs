//! TokenCredentialRequest wire types
//!
//! The request is a virtual resource: it is decoded from the create call,
//! answered once, and never stored.

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use concord_common::LOGIN_API_GROUP;

/// API version served for credential requests
pub const API_VERSION: &str = "v1alpha1";

/// Kind of the credential request resource
pub const KIND: &str = "TokenCredentialRequest";

/// The only credential type currently accepted in `spec.type`
pub const TOKEN_CREDENTIAL_TYPE: &str = "TokenCredential";

/// Message returned for every failed authentication
pub const AUTHENTICATION_FAILED_MESSAGE: &str = "authentication failed";

/// Request to exchange a bearer token for a cluster credential
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCredentialRequest {
    /// `login.concierge.concord.dev/v1alpha1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// `TokenCredentialRequest`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Object metadata; only `name` is used, for error messages
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// What the caller presents
    #[serde(default)]
    pub spec: TokenCredentialRequestSpec,
    /// What the broker answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TokenCredentialRequestStatus>,
}

/// Caller-supplied part of a credential request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCredentialRequestSpec {
    /// Credential type; must be [`TOKEN_CREDENTIAL_TYPE`]
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<String>,
    /// Bearer token to authenticate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenCredential>,
    /// Authenticator that should evaluate the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<TypedLocalObjectReference>,
}

/// Opaque bearer token
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCredential {
    /// Token value
    #[serde(default)]
    pub value: String,
}

impl std::fmt::Debug for TokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCredential")
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Broker answer to a credential request
///
/// Exactly one of `credential` and `message` is set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCredentialRequestStatus {
    /// Issued cluster credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<ClusterCredential>,
    /// Identity the credential was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Short-lived credential for the cluster
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCredential {
    /// RFC 3339 time after which the credential is no longer valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<String>,
    /// Bearer token, when the credential is a token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// PEM client certificate, when the credential is a certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// PEM private key for `client_certificate_data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

impl std::fmt::Debug for ClusterCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredential")
            .field("expiration_timestamp", &self.expiration_timestamp)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_certificate_data", &self.client_certificate_data)
            .field("client_key_data", &self.client_key_data.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Identity a credential is issued for
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Username
    pub name: String,
    /// Groups, as reported by the authenticator
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Full `apiVersion` value for credential requests
pub fn api_version() -> String {
    format!("{}/{}", LOGIN_API_GROUP, API_VERSION)
}

impl TokenCredentialRequest {
    /// Build a request for `token` evaluated by the referenced authenticator
    pub fn new(token: impl Into<String>, authenticator: Option<TypedLocalObjectReference>) -> Self {
        Self {
            api_version: Some(api_version()),
            kind: Some(KIND.to_string()),
            metadata: ObjectMeta::default(),
            spec: TokenCredentialRequestSpec {
                credential_type: Some(TOKEN_CREDENTIAL_TYPE.to_string()),
                token: Some(TokenCredential {
                    value: token.into(),
                }),
                authenticator,
            },
            status: None,
        }
    }

    /// Response carrying an issued credential for `user`
    pub fn success(credential: ClusterCredential, user: User) -> Self {
        Self::response(TokenCredentialRequestStatus {
            credential: Some(credential),
            user: Some(user),
            message: None,
        })
    }

    /// The single failure response for every unsuccessful authentication
    pub fn failure() -> Self {
        Self::response(TokenCredentialRequestStatus {
            credential: None,
            user: None,
            message: Some(AUTHENTICATION_FAILED_MESSAGE.to_string()),
        })
    }

    fn response(status: TokenCredentialRequestStatus) -> Self {
        Self {
            api_version: Some(api_version()),
            kind: Some(KIND.to_string()),
            metadata: ObjectMeta::default(),
            spec: TokenCredentialRequestSpec::default(),
            status: Some(status),
        }
    }

    /// Object name, or empty for unnamed requests
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Presented token value, if any
    pub fn token(&self) -> Option<&str> {
        self.spec.token.as_ref().map(|t| t.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_request_body() {
        let body = serde_json::json!({
            "apiVersion": "login.concierge.concord.dev/v1alpha1",
            "kind": "TokenCredentialRequest",
            "metadata": {"name": "login"},
            "spec": {
                "type": "TokenCredential",
                "token": {"value": "abc"},
                "authenticator": {
                    "apiGroup": "authentication.concierge.concord.dev",
                    "kind": "WebhookAuthenticator",
                    "name": "corp"
                }
            }
        });

        let request: TokenCredentialRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.name(), "login");
        assert_eq!(request.token(), Some("abc"));
        assert_eq!(
            request.spec.credential_type.as_deref(),
            Some(TOKEN_CREDENTIAL_TYPE)
        );
        let authenticator = request.spec.authenticator.unwrap();
        assert_eq!(authenticator.kind, "WebhookAuthenticator");
        assert_eq!(authenticator.name, "corp");
    }

    #[test]
    fn failure_has_message_and_no_credential() {
        let value = serde_json::to_value(TokenCredentialRequest::failure()).unwrap();
        assert_eq!(value["status"]["message"], AUTHENTICATION_FAILED_MESSAGE);
        assert!(value["status"].get("credential").is_none());
        assert!(value["status"].get("user").is_none());
        assert_eq!(value["kind"], KIND);
    }

    #[test]
    fn success_has_credential_and_no_message() {
        let response = TokenCredentialRequest::success(
            ClusterCredential {
                expiration_timestamp: Some("2030-01-01T00:00:00Z".to_string()),
                client_certificate_data: Some("cert".to_string()),
                client_key_data: Some("key".to_string()),
                token: None,
            },
            User {
                name: "alice".to_string(),
                groups: vec!["devs".to_string()],
            },
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"]["user"]["name"], "alice");
        assert_eq!(
            value["status"]["credential"]["expirationTimestamp"],
            "2030-01-01T00:00:00Z"
        );
        assert!(value["status"].get("message").is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let request = TokenCredentialRequest::new("super-secret", None);
        assert!(!format!("{:?}", request).contains("super-secret"));

        let credential = ClusterCredential {
            client_key_data: Some("PRIVATE KEY".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", credential).contains("PRIVATE KEY"));
    }
}
