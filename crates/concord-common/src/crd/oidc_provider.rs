//! OIDCProvider CRD for issuer configuration
//!
//! An OIDCProvider declares one OIDC issuer served by this cluster. Its
//! current signing keys are stored as a JWKS document in the Secret named
//! by `status.jwksSecret`, under the [`crate::JWKS_SECRET_KEY`] data key.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OIDCProvider defines an issuer whose JWKS the broker tracks.
///
/// Example:
/// ```yaml
/// apiVersion: config.supervisor.concord.dev/v1alpha1
/// kind: OIDCProvider
/// metadata:
///   name: corporate-idp
///   namespace: concord-system
/// spec:
///   issuer: https://idp.example.com
/// status:
///   jwksSecret:
///     name: corporate-idp-jwks
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.supervisor.concord.dev",
    version = "v1alpha1",
    kind = "OIDCProvider",
    namespaced,
    status = "OIDCProviderStatus",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuer"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OIDCProviderSpec {
    /// Issuer URL, matched exactly against the `iss` claim of incoming tokens
    pub issuer: String,
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

/// OIDCProvider status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OIDCProviderStatus {
    /// Current phase
    #[serde(default)]
    pub phase: OIDCProviderPhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Secret holding the issuer's JWKS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_secret: Option<SecretRef>,
}

/// OIDCProvider phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OIDCProviderPhase {
    /// Keys not yet published
    #[default]
    Pending,
    /// Keys published to the JWKS Secret
    Ready,
    /// Configuration is invalid
    Invalid,
}

impl OIDCProvider {
    /// Name of the Secret holding this issuer's JWKS, if one has been assigned
    pub fn jwks_secret_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.jwks_secret.as_ref())
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
    }
}
