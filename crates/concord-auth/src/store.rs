//! Issuer to JWKS map shared between the JWKS observer and JWT authenticators
//!
//! The map is only ever replaced as a whole. Readers take an `Arc` snapshot and
//! see either the previous map or the new one, never a partial rebuild.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

#[cfg(test)]
use mockall::automock;

use crate::jwt::JwkSet;

/// Issuer URL to key set
pub type IssuerJwksMap = HashMap<String, JwkSet>;

/// Write side of the issuer JWKS store
#[cfg_attr(test, automock)]
pub trait IssuerToJwksMapSetter: Send + Sync {
    /// Replace the published map
    fn set_issuer_to_jwks_map(&self, map: IssuerJwksMap);
}

/// Concurrency-safe holder of the current issuer to JWKS map
#[derive(Debug, Default)]
pub struct IssuerJwksStore {
    current: RwLock<Arc<IssuerJwksMap>>,
}

impl IssuerJwksStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The map as of the last publish
    pub fn snapshot(&self) -> Arc<IssuerJwksMap> {
        self.current.read().clone()
    }

    /// Key set for one issuer, if published
    pub fn get(&self, issuer: &str) -> Option<JwkSet> {
        self.current.read().get(issuer).cloned()
    }

    /// Number of issuers in the published map
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Whether the published map is empty
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl IssuerToJwksMapSetter for IssuerJwksStore {
    fn set_issuer_to_jwks_map(&self, map: IssuerJwksMap) {
        let map = Arc::new(map);
        *self.current.write() = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::Jwk;

    fn key_set(kid: &str) -> JwkSet {
        JwkSet {
            keys: vec![Jwk::ec_p256(kid, "eA", "eQ")],
        }
    }

    #[test]
    fn starts_empty() {
        let store = IssuerJwksStore::new();
        assert!(store.is_empty());
        assert!(store.get("https://idp.example.com").is_none());
    }

    #[test]
    fn publish_replaces_whole_map() {
        let store = IssuerJwksStore::new();
        store.set_issuer_to_jwks_map(HashMap::from([
            ("https://a.example.com".to_string(), key_set("a")),
            ("https://b.example.com".to_string(), key_set("b")),
        ]));
        assert_eq!(store.len(), 2);

        store.set_issuer_to_jwks_map(HashMap::from([(
            "https://c.example.com".to_string(),
            key_set("c"),
        )]));
        assert_eq!(store.len(), 1);
        assert!(store.get("https://a.example.com").is_none());
        assert_eq!(store.get("https://c.example.com"), Some(key_set("c")));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_publish() {
        let store = IssuerJwksStore::new();
        store.set_issuer_to_jwks_map(HashMap::from([(
            "https://a.example.com".to_string(),
            key_set("a"),
        )]));
        let before = store.snapshot();

        store.set_issuer_to_jwks_map(HashMap::new());

        assert_eq!(before.len(), 1);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn concurrent_readers_see_complete_maps() {
        let store = Arc::new(IssuerJwksStore::new());
        let full: IssuerJwksMap = (0..16)
            .map(|i| (format!("https://idp{i}.example.com"), key_set("k")))
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let len = store.snapshot().len();
                        assert!(len == 0 || len == 16, "observed partial map of {len}");
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            store.set_issuer_to_jwks_map(full.clone());
            store.set_issuer_to_jwks_map(HashMap::new());
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
