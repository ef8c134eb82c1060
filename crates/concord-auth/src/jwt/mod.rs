//! JWT authentication against locally published key sets

mod authenticator;
mod jwks;
mod verify;

pub use authenticator::{JwtTokenAuthenticator, JwtTokenAuthenticatorConfig};
pub use jwks::{Jwk, JwkSet, JwksParseError};
