//! Compact JWS parsing, signature verification and claim checks
//!
//! Signatures are verified with aws-lc-rs. Only asymmetric algorithms are
//! accepted; `none` and HMAC algorithms are rejected before key lookup.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use aws_lc_rs::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::jwks::{Jwk, JwkSet};

/// Why a token failed verification
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum JwtError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("no key matches kid {kid:?} for {alg}")]
    KeyNotFound { kid: Option<String>, alg: String },
    #[error("signature verification failed")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("issuer mismatch: {0}")]
    IssuerMismatch(String),
    #[error("audience does not include {0}")]
    AudienceMismatch(String),
    #[error("missing claim {0}")]
    MissingClaim(&'static str),
}

#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub(crate) alg: String,
    #[serde(default)]
    pub(crate) kid: Option<String>,
}

/// Audience claim, a single string or an array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Registered claims plus everything else
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Claims {
    #[serde(default)]
    pub(crate) iss: Option<String>,
    #[serde(default)]
    pub(crate) aud: Option<Audience>,
    #[serde(default)]
    pub(crate) exp: Option<u64>,
    #[serde(default)]
    pub(crate) nbf: Option<u64>,
    #[serde(flatten)]
    pub(crate) other: HashMap<String, Value>,
}

impl Claims {
    /// An unregistered claim by name
    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.other.get(name)
    }

    /// String values of a claim that is a string or an array of strings
    pub(crate) fn strings(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// A compact JWS whose payload has been decoded but not yet verified
#[derive(Debug)]
pub(crate) struct UnverifiedJwt<'a> {
    pub(crate) header: Header,
    pub(crate) claims: Claims,
    signing_input: &'a str,
    signature: Vec<u8>,
}

impl<'a> UnverifiedJwt<'a> {
    pub(crate) fn parse(token: &'a str) -> Result<Self, JwtError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JwtError::Malformed("expected three segments".to_string()));
        };

        let header: Header = decode_json(header_b64, "header")?;
        if !is_supported_algorithm(&header.alg) {
            return Err(JwtError::UnsupportedAlgorithm(header.alg));
        }
        let claims: Claims = decode_json(payload_b64, "payload")?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| JwtError::Malformed(format!("signature encoding: {e}")))?;

        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        Ok(Self {
            header,
            claims,
            signing_input,
            signature,
        })
    }

    pub(crate) fn verify_signature(&self, jwk: &Jwk) -> Result<(), JwtError> {
        let message = self.signing_input.as_bytes();
        let sig = &self.signature;
        match self.header.alg.as_str() {
            "RS256" => verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA256, jwk, message, sig),
            "RS384" => verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA384, jwk, message, sig),
            "RS512" => verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA512, jwk, message, sig),
            "ES256" => verify_ec(&signature::ECDSA_P256_SHA256_FIXED, jwk, message, sig),
            "ES384" => verify_ec(&signature::ECDSA_P384_SHA384_FIXED, jwk, message, sig),
            other => Err(JwtError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Expected issuer and audience plus the skew allowed on time claims
/// Pick the key the token's header asks for
pub(crate) fn select_key<'a>(keys: &'a JwkSet, header: &Header) -> Result<&'a Jwk, JwtError> {
    keys.find(header.kid.as_deref(), &header.alg)
        .ok_or_else(|| JwtError::KeyNotFound {
            kid: header.kid.clone(),
            alg: header.alg.clone(),
        })
}

#[derive(Debug, Clone)]
pub(crate) struct ClaimRequirements<'a> {
    pub(crate) issuer: &'a str,
    pub(crate) audience: &'a str,
    pub(crate) clock_skew_secs: u64,
}

pub(crate) fn validate_claims(claims: &Claims, req: &ClaimRequirements<'_>) -> Result<(), JwtError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    validate_claims_at(claims, req, now)
}

fn validate_claims_at(claims: &Claims, req: &ClaimRequirements<'_>, now: u64) -> Result<(), JwtError> {
    match claims.iss.as_deref() {
        Some(iss) if iss == req.issuer => {}
        Some(iss) => return Err(JwtError::IssuerMismatch(iss.to_string())),
        None => return Err(JwtError::MissingClaim("iss")),
    }

    match &claims.aud {
        Some(aud) if aud.contains(req.audience) => {}
        Some(_) => return Err(JwtError::AudienceMismatch(req.audience.to_string())),
        None => return Err(JwtError::MissingClaim("aud")),
    }

    let exp = claims.exp.ok_or(JwtError::MissingClaim("exp"))?;
    if now > exp.saturating_add(req.clock_skew_secs) {
        return Err(JwtError::Expired);
    }

    if let Some(nbf) = claims.nbf {
        if now.saturating_add(req.clock_skew_secs) < nbf {
            return Err(JwtError::NotYetValid);
        }
    }

    Ok(())
}

fn is_supported_algorithm(alg: &str) -> bool {
    matches!(alg, "RS256" | "RS384" | "RS512" | "ES256" | "ES384")
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str, what: &str) -> Result<T, JwtError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JwtError::Malformed(format!("{what} encoding: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| JwtError::Malformed(format!("{what}: {e}")))
}

fn decode_component(value: Option<&String>) -> Result<Vec<u8>, JwtError> {
    let value = value.ok_or(JwtError::BadSignature)?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| JwtError::BadSignature)
}

fn verify_rsa(
    params: &'static signature::RsaParameters,
    jwk: &Jwk,
    message: &[u8],
    sig: &[u8],
) -> Result<(), JwtError> {
    let key = RsaPublicKeyComponents {
        n: decode_component(jwk.n.as_ref())?,
        e: decode_component(jwk.e.as_ref())?,
    };
    key.verify(params, message, sig)
        .map_err(|_| JwtError::BadSignature)
}

fn verify_ec(
    alg: &'static signature::EcdsaVerificationAlgorithm,
    jwk: &Jwk,
    message: &[u8],
    sig: &[u8],
) -> Result<(), JwtError> {
    // Uncompressed SEC1 point: 0x04 || x || y
    let mut point = vec![0x04];
    point.extend(decode_component(jwk.x.as_ref())?);
    point.extend(decode_component(jwk.y.as_ref())?);

    UnparsedPublicKey::new(alg, &point)
        .verify(message, sig)
        .map_err(|_| JwtError::BadSignature)
}
