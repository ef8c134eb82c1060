//! TokenCredentialRequest API for the Concord identity broker
//!
//! A caller POSTs a bearer token and a reference to an authenticator. The
//! [`CredentialRequestHandler`] validates the request, runs pre-flight
//! [`CreateValidator`]s, authenticates the token, and answers with either a
//! short-lived client certificate from a [`CredentialIssuer`] or the generic
//! "authentication failed" response.

#![deny(missing_docs)]

pub mod admission;
pub mod error;
pub mod handler;
pub mod issuer;
pub mod server;
pub mod types;
pub mod validation;

pub use admission::{CreateValidator, RequireAuthenticatorRef};
pub use error::{ApiError, FieldError, FieldErrorKind, Result};
pub use handler::CredentialRequestHandler;
pub use issuer::{
    ClientCertIssuer, CredentialIssuer, IssuedCredential, IssuerConfig, IssuerError,
    DEFAULT_CREDENTIAL_TTL,
};
pub use server::{router, start_server, AppState, ServerConfig, ServerError, TlsConfig};
pub use types::{
    ClusterCredential, TokenCredential, TokenCredentialRequest, TokenCredentialRequestSpec,
    TokenCredentialRequestStatus, User, AUTHENTICATION_FAILED_MESSAGE, TOKEN_CREDENTIAL_TYPE,
};
pub use validation::CreateOptions;
