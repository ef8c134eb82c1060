//! Custom Resource Definitions for the Concord broker
//!
//! - [`OIDCProvider`]: namespaced issuer configuration whose JWKS lives in a Secret
//! - [`WebhookAuthenticator`]: cluster-scoped reference to a TokenReview webhook
//! - [`JWTAuthenticator`]: cluster-scoped JWT/OIDC token verification settings

mod authenticator;
mod oidc_provider;

pub use authenticator::{
    JWTAuthenticator, JWTAuthenticatorSpec, JwtClaimMappings, TlsSpec, WebhookAuthenticator,
    WebhookAuthenticatorSpec,
};
pub use oidc_provider::{
    OIDCProvider, OIDCProviderPhase, OIDCProviderSpec, OIDCProviderStatus, SecretRef,
};
