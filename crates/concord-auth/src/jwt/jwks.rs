//! JSON Web Key Set types
//!
//! Key sets arrive as the `jwks` entry of a Secret. Parsing checks that every
//! key carries the components its type needs, so a set that parses can be
//! used for verification without further shape checks.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a JWKS document
#[derive(Debug, Error)]
pub enum JwksParseError {
    /// The document is not a JSON key set
    #[error("invalid JWKS JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A key is missing components or has an unsupported type
    #[error("invalid key at index {index}: {reason}")]
    InvalidKey {
        /// Position of the key within `keys`
        index: usize,
        /// What was wrong with it
        reason: String,
    },
}

/// A JSON Web Key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC")
    pub kty: String,

    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use ("sig" or "enc")
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Whether this key may verify signatures
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }

    /// Whether this key can verify a JWS with the given `alg`
    pub fn supports(&self, alg: &str) -> bool {
        if let Some(key_alg) = &self.alg {
            if key_alg != alg {
                return false;
            }
        }
        match (self.kty.as_str(), alg) {
            ("RSA", "RS256" | "RS384" | "RS512") => true,
            ("EC", "ES256") => self.crv.as_deref() == Some("P-256"),
            ("EC", "ES384") => self.crv.as_deref() == Some("P-384"),
            _ => false,
        }
    }

    fn check(&self) -> Result<(), String> {
        let components: &[(&str, &Option<String>)] = match self.kty.as_str() {
            "RSA" => &[("n", &self.n), ("e", &self.e)],
            "EC" => {
                match self.crv.as_deref() {
                    Some("P-256" | "P-384") => {}
                    Some(other) => return Err(format!("unsupported curve {other}")),
                    None => return Err("EC key missing crv".to_string()),
                }
                &[("x", &self.x), ("y", &self.y)]
            }
            other => return Err(format!("unsupported key type {other:?}")),
        };

        for (name, value) in components {
            let value = value
                .as_deref()
                .ok_or_else(|| format!("{} key missing {name}", self.kty))?;
            URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|e| format!("{name} is not base64url: {e}"))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn rsa(kid: &str, n: &str, e: &str) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            alg: None,
            use_: Some("sig".to_string()),
            n: Some(n.to_string()),
            e: Some(e.to_string()),
            crv: None,
            x: None,
            y: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn ec_p256(kid: &str, x: &str, y: &str) -> Self {
        Self {
            kty: "EC".to_string(),
            kid: Some(kid.to_string()),
            alg: None,
            use_: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(x.to_string()),
            y: Some(y.to_string()),
        }
    }
}

/// A JSON Web Key Set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Keys in the set
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parse and check a JWKS document
    pub fn parse(data: &[u8]) -> Result<Self, JwksParseError> {
        let set: JwkSet = serde_json::from_slice(data)?;
        for (index, key) in set.keys.iter().enumerate() {
            key.check()
                .map_err(|reason| JwksParseError::InvalidKey { index, reason })?;
        }
        Ok(set)
    }

    /// Select the key for a JWS header
    ///
    /// With a `kid`, only a key with that ID is eligible. Without one, the
    /// first signing key able to verify `alg` is used.
    pub fn find(&self, kid: Option<&str>, alg: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| {
            key.is_signing_key()
                && key.supports(alg)
                && kid.map_or(true, |kid| key.kid.as_deref() == Some(kid))
        })
    }
}
