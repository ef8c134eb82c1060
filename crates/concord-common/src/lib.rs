//! Common types for Concord: CRDs, errors, telemetry, and backoff policy

#![deny(missing_docs)]

pub mod backoff;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the broker runs in and watches for issuer configuration
pub const CONCORD_SYSTEM_NAMESPACE: &str = "concord-system";

/// Key inside an issuer's JWKS Secret that holds the serialized key set
pub const JWKS_SECRET_KEY: &str = "jwks";

/// API group of the authenticator CRDs referenced by credential requests
pub const AUTHENTICATION_API_GROUP: &str = "authentication.concierge.concord.dev";

/// API group of the credential request virtual resource
pub const LOGIN_API_GROUP: &str = "login.concierge.concord.dev";

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "concord-operator";
