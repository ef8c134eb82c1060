//! Authenticator CRDs
//!
//! Credential requests name one of these resources in their
//! `authenticator` reference. Both kinds are cluster-scoped.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// WebhookAuthenticator delegates token checks to an external TokenReview webhook.
///
/// Example:
/// ```yaml
/// apiVersion: authentication.concierge.concord.dev/v1alpha1
/// kind: WebhookAuthenticator
/// metadata:
///   name: corp-webhook
/// spec:
///   endpoint: https://authn.example.com/token-review
///   tls:
///     certificateAuthorityData: LS0tLS1CRUdJTi...
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "authentication.concierge.concord.dev",
    version = "v1alpha1",
    kind = "WebhookAuthenticator",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuthenticatorSpec {
    /// HTTPS URL of the TokenReview webhook
    pub endpoint: String,

    /// TLS settings for calling the webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

/// TLS settings for outbound calls
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Base64-encoded PEM CA bundle trusted for the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// JWTAuthenticator verifies JWTs locally against the issuer's tracked JWKS.
///
/// Example:
/// ```yaml
/// apiVersion: authentication.concierge.concord.dev/v1alpha1
/// kind: JWTAuthenticator
/// metadata:
///   name: corp-jwt
/// spec:
///   issuer: https://idp.example.com
///   audience: concord
///   claims:
///     username: email
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "authentication.concierge.concord.dev",
    version = "v1alpha1",
    kind = "JWTAuthenticator",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuer"}"#,
    printcolumn = r#"{"name":"Audience","type":"string","jsonPath":".spec.audience"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JWTAuthenticatorSpec {
    /// Expected `iss` claim; also the key into the issuer JWKS store
    pub issuer: String,

    /// Value that must appear in the `aud` claim
    pub audience: String,

    /// Claim names used to build the identity
    #[serde(default)]
    pub claims: JwtClaimMappings,
}

/// Claim names mapped onto the Kubernetes identity
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaimMappings {
    /// Claim holding the username (default: "username")
    #[serde(default = "default_username_claim")]
    pub username: String,

    /// Claim holding the groups (default: "groups")
    #[serde(default = "default_groups_claim")]
    pub groups: String,
}

impl Default for JwtClaimMappings {
    fn default() -> Self {
        Self {
            username: default_username_claim(),
            groups: default_groups_claim(),
        }
    }
}

fn default_username_claim() -> String {
    "username".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}
