//! Live authenticators keyed by the reference a credential request names

use std::fmt;
use std::sync::Arc;

use concord_common::AUTHENTICATION_API_GROUP;
use dashmap::DashMap;

use crate::authenticator::Authenticator;

/// Kinds of authenticator a request may reference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthenticatorKind {
    /// Backed by a `WebhookAuthenticator` resource
    Webhook,
    /// Backed by a `JWTAuthenticator` resource
    Jwt,
}

impl AuthenticatorKind {
    /// Parse a resource kind; unknown kinds have no authenticator
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "WebhookAuthenticator" => Some(Self::Webhook),
            "JWTAuthenticator" => Some(Self::Jwt),
            _ => None,
        }
    }

    /// Resource kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "WebhookAuthenticator",
            Self::Jwt => "JWTAuthenticator",
        }
    }
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one authenticator resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AuthenticatorKey {
    /// Authenticator kind
    pub kind: AuthenticatorKind,
    /// Resource name
    pub name: String,
}

impl AuthenticatorKey {
    /// Create a key
    pub fn new(kind: AuthenticatorKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Resolve a typed object reference
    ///
    /// The reference must name the authentication API group and a known kind.
    pub fn from_reference(api_group: Option<&str>, kind: &str, name: &str) -> Option<Self> {
        if api_group != Some(AUTHENTICATION_API_GROUP) || name.is_empty() {
            return None;
        }
        AuthenticatorKind::from_kind(kind).map(|kind| Self::new(kind, name))
    }
}

impl fmt::Display for AuthenticatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Concurrent map of live authenticators
///
/// Written by the authenticator cache controllers, read by every credential
/// request.
#[derive(Default)]
pub struct AuthenticatorRegistry {
    entries: DashMap<AuthenticatorKey, Arc<dyn Authenticator>>,
}

impl AuthenticatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace an authenticator
    pub fn insert(&self, key: AuthenticatorKey, authenticator: Arc<dyn Authenticator>) {
        self.entries.insert(key, authenticator);
    }

    /// Remove an authenticator, returning whether one was present
    pub fn remove(&self, key: &AuthenticatorKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Look up an authenticator
    pub fn get(&self, key: &AuthenticatorKey) -> Option<Arc<dyn Authenticator>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Keys of one kind currently registered
    pub fn keys_of(&self, kind: AuthenticatorKind) -> Vec<AuthenticatorKey> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered authenticators
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no authenticators are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
