use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// Identity reported by an authenticator
///
/// Groups and extras are carried exactly as the authenticator reported them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// Kubernetes username
    pub username: String,
    /// Group memberships, in reported order
    pub groups: Vec<String>,
    /// Additional attributes, each an ordered list of values
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    /// Create an identity with a username and groups
    pub fn new(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            groups,
            extra: BTreeMap::new(),
        }
    }
}

/// Verdict of an authenticator that was able to evaluate the token
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// The token proves this identity
    Authenticated(UserInfo),
    /// The token was evaluated and rejected
    NotAuthenticated,
}

impl AuthenticationOutcome {
    /// The authenticated identity, if any
    pub fn user(&self) -> Option<&UserInfo> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::NotAuthenticated => None,
        }
    }
}

/// Turns a bearer token into an authentication outcome
///
/// `Err` is reserved for failures that prevent a verdict (unreachable webhook,
/// missing keys, cancellation). An invalid token is
/// `Ok(AuthenticationOutcome::NotAuthenticated)`.
///
/// Implementations must stop work promptly once `cancel` fires and return
/// [`AuthError::Cancelled`](crate::AuthError::Cancelled).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a bearer token
    async fn authenticate(
        &self,
        cancel: &CancellationToken,
        token: &str,
    ) -> Result<AuthenticationOutcome>;
}
