//! Token authenticators for the Concord identity broker
//!
//! An [`Authenticator`] turns a bearer token into an [`AuthenticationOutcome`].
//! Two variants exist: [`WebhookTokenAuthenticator`] delegates the verdict to an
//! external TokenReview webhook, and [`JwtTokenAuthenticator`] verifies JWTs
//! locally against keys published in the [`IssuerJwksStore`].
//!
//! Live authenticators are held in an [`AuthenticatorRegistry`] keyed by the
//! reference a credential request names.

#![deny(missing_docs)]

mod authenticator;
pub mod error;
pub mod jwt;
pub mod registry;
pub mod store;
pub mod webhook;

pub use authenticator::{AuthenticationOutcome, Authenticator, UserInfo};
pub use error::{AuthError, Result};
pub use jwt::{Jwk, JwkSet, JwksParseError, JwtTokenAuthenticator, JwtTokenAuthenticatorConfig};
pub use registry::{AuthenticatorKey, AuthenticatorKind, AuthenticatorRegistry};
pub use store::{IssuerJwksMap, IssuerJwksStore, IssuerToJwksMapSetter};
pub use webhook::WebhookTokenAuthenticator;
