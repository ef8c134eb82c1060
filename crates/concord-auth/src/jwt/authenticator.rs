//! Authenticator that verifies JWTs against the issuer JWKS store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::verify::{select_key, validate_claims, ClaimRequirements, UnverifiedJwt};
use crate::authenticator::{AuthenticationOutcome, Authenticator, UserInfo};
use crate::error::{AuthError, Result};
use crate::store::IssuerJwksStore;

/// Default tolerance applied to `exp` and `nbf`
const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// What a JWT must carry to be accepted, and where the identity is read from
#[derive(Debug, Clone)]
pub struct JwtTokenAuthenticatorConfig {
    /// Required `iss` claim; also the key into the JWKS store
    pub issuer: String,
    /// Value that must appear in the `aud` claim
    pub audience: String,
    /// Claim holding the username
    pub username_claim: String,
    /// Claim holding the groups (string or array of strings)
    pub groups_claim: String,
    /// Tolerance applied to `exp` and `nbf`
    pub clock_skew: Duration,
}

impl JwtTokenAuthenticatorConfig {
    /// Config with the default `username` and `groups` claims
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            username_claim: "username".to_string(),
            groups_claim: "groups".to_string(),
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

/// Verifies JWTs locally; never makes a network call
///
/// Keys are read from the store on every call, so a rotation published by the
/// JWKS observer takes effect for the next token.
pub struct JwtTokenAuthenticator {
    config: JwtTokenAuthenticatorConfig,
    store: Arc<IssuerJwksStore>,
}

impl JwtTokenAuthenticator {
    /// Create an authenticator reading keys from `store`
    pub fn new(config: JwtTokenAuthenticatorConfig, store: Arc<IssuerJwksStore>) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(AuthError::configuration("issuer must not be empty"));
        }
        if config.audience.is_empty() {
            return Err(AuthError::configuration("audience must not be empty"));
        }
        Ok(Self { config, store })
    }

    /// Issuer this authenticator accepts tokens from
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    fn reject(&self, reason: impl std::fmt::Display) -> Result<AuthenticationOutcome> {
        debug!(issuer = %self.config.issuer, reason = %reason, "JWT rejected");
        Ok(AuthenticationOutcome::NotAuthenticated)
    }
}

#[async_trait]
impl Authenticator for JwtTokenAuthenticator {
    async fn authenticate(
        &self,
        cancel: &CancellationToken,
        token: &str,
    ) -> Result<AuthenticationOutcome> {
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let jwt = match UnverifiedJwt::parse(token) {
            Ok(jwt) => jwt,
            Err(e) => return self.reject(e),
        };

        if jwt.claims.iss.as_deref() != Some(self.config.issuer.as_str()) {
            return self.reject("token issued by a different issuer");
        }

        let keys = self
            .store
            .get(&self.config.issuer)
            .ok_or_else(|| AuthError::UnknownIssuer {
                issuer: self.config.issuer.clone(),
            })?;

        let jwk = match select_key(&keys, &jwt.header) {
            Ok(jwk) => jwk,
            Err(e) => return self.reject(e),
        };

        if let Err(e) = jwt.verify_signature(jwk) {
            return self.reject(e);
        }

        let requirements = ClaimRequirements {
            issuer: &self.config.issuer,
            audience: &self.config.audience,
            clock_skew_secs: self.config.clock_skew.as_secs(),
        };
        if let Err(e) = validate_claims(&jwt.claims, &requirements) {
            return self.reject(e);
        }

        let username = match jwt
            .claims
            .get(&self.config.username_claim)
            .and_then(|v| v.as_str())
        {
            Some(username) if !username.is_empty() => username.to_string(),
            _ => {
                return self.reject(format!(
                    "missing username claim {}",
                    self.config.username_claim
                ))
            }
        };
        let groups = jwt.claims.strings(&self.config.groups_claim);

        debug!(issuer = %self.config.issuer, username = %username, "JWT authenticated");
        Ok(AuthenticationOutcome::Authenticated(UserInfo::new(
            username, groups,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::rsa::{KeyPair as RsaKeyPair, KeySize, PublicKeyComponents};
    use aws_lc_rs::signature::{
        EcdsaKeyPair, KeyPair, RsaEncoding, ECDSA_P256_SHA256_FIXED_SIGNING, RSA_PKCS1_SHA256,
        RSA_PKCS1_SHA384, RSA_PKCS1_SHA512,
    };
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::{json, Value};

    use super::*;
    use crate::jwt::{Jwk, JwkSet};
    use crate::store::IssuerToJwksMapSetter;

    const ISSUER: &str = "https://idp.example.com";

    struct Signer {
        key: EcdsaKeyPair,
        kid: String,
    }

    impl Signer {
        fn new(kid: &str) -> Self {
            Self {
                key: EcdsaKeyPair::generate(&ECDSA_P256_SHA256_FIXED_SIGNING).unwrap(),
                kid: kid.to_string(),
            }
        }

        fn jwk(&self) -> Jwk {
            let point = self.key.public_key().as_ref();
            Jwk::ec_p256(
                &self.kid,
                &URL_SAFE_NO_PAD.encode(&point[1..33]),
                &URL_SAFE_NO_PAD.encode(&point[33..65]),
            )
        }

        fn sign(&self, claims: Value) -> String {
            let header = json!({"alg": "ES256", "kid": self.kid, "typ": "JWT"});
            let input = format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
            );
            let sig = self.key.sign(&SystemRandom::new(), input.as_bytes()).unwrap();
            format!("{input}.{}", URL_SAFE_NO_PAD.encode(sig.as_ref()))
        }
    }

    struct RsaSigner {
        key: RsaKeyPair,
        kid: String,
    }

    impl RsaSigner {
        fn new(kid: &str) -> Self {
            Self {
                key: RsaKeyPair::generate(KeySize::Rsa2048).unwrap(),
                kid: kid.to_string(),
            }
        }

        fn jwk(&self) -> Jwk {
            let components = PublicKeyComponents::<Vec<u8>>::from(self.key.public_key());
            Jwk::rsa(
                &self.kid,
                &URL_SAFE_NO_PAD.encode(&components.n),
                &URL_SAFE_NO_PAD.encode(&components.e),
            )
        }

        fn sign(&self, alg: &str, claims: Value) -> String {
            let encoding: &'static dyn RsaEncoding = match alg {
                "RS256" => &RSA_PKCS1_SHA256,
                "RS384" => &RSA_PKCS1_SHA384,
                "RS512" => &RSA_PKCS1_SHA512,
                other => panic!("not an RSA algorithm: {other}"),
            };
            let header = json!({"alg": alg, "kid": self.kid, "typ": "JWT"});
            let input = format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
            );
            let mut sig = vec![0; self.key.public_modulus_len()];
            self.key
                .sign(encoding, &SystemRandom::new(), input.as_bytes(), &mut sig)
                .unwrap();
            format!("{input}.{}", URL_SAFE_NO_PAD.encode(&sig))
        }
    }

    fn setup_keys(keys: Vec<Jwk>) -> JwtTokenAuthenticator {
        let store = Arc::new(IssuerJwksStore::new());
        store.set_issuer_to_jwks_map(HashMap::from([(ISSUER.to_string(), JwkSet { keys })]));
        JwtTokenAuthenticator::new(JwtTokenAuthenticatorConfig::new(ISSUER, "concord"), store)
            .unwrap()
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn claims() -> Value {
        json!({
            "iss": ISSUER,
            "aud": "concord",
            "exp": now() + 300,
            "iat": now(),
            "username": "alice@example.com",
            "groups": ["devs", "ops", "devs"],
        })
    }

    fn setup(signer: &Signer) -> (Arc<IssuerJwksStore>, JwtTokenAuthenticator) {
        let store = Arc::new(IssuerJwksStore::new());
        store.set_issuer_to_jwks_map(HashMap::from([(
            ISSUER.to_string(),
            JwkSet {
                keys: vec![signer.jwk()],
            },
        )]));
        let auth = JwtTokenAuthenticator::new(
            JwtTokenAuthenticatorConfig::new(ISSUER, "concord"),
            store.clone(),
        )
        .unwrap();
        (store, auth)
    }

    async fn authenticate(auth: &JwtTokenAuthenticator, token: &str) -> Result<AuthenticationOutcome> {
        auth.authenticate(&CancellationToken::new(), token).await
    }

    #[tokio::test]
    async fn valid_token_authenticates_with_groups_passed_through() {
        let signer = Signer::new("k1");
        let (_, auth) = setup(&signer);

        let outcome = authenticate(&auth, &signer.sign(claims())).await.unwrap();

        assert_eq!(
            outcome,
            AuthenticationOutcome::Authenticated(UserInfo::new(
                "alice@example.com",
                vec!["devs".into(), "ops".into(), "devs".into()],
            ))
        );
    }

    #[tokio::test]
    async fn custom_claim_names() {
        let signer = Signer::new("k1");
        let (store, _) = setup(&signer);
        let mut config = JwtTokenAuthenticatorConfig::new(ISSUER, "concord");
        config.username_claim = "sub".to_string();
        config.groups_claim = "team".to_string();
        let auth = JwtTokenAuthenticator::new(config, store).unwrap();

        let mut c = claims();
        c["sub"] = json!("user-123");
        c["team"] = json!("platform");
        let outcome = authenticate(&auth, &signer.sign(c)).await.unwrap();

        assert_eq!(
            outcome.user(),
            Some(&UserInfo::new("user-123", vec!["platform".into()]))
        );
    }

    #[tokio::test]
    async fn invalid_tokens_are_not_authenticated() {
        let signer = Signer::new("k1");
        let (_, auth) = setup(&signer);

        let mut wrong_aud = claims();
        wrong_aud["aud"] = json!("someone-else");
        let mut expired = claims();
        expired["exp"] = json!(now() - 600);
        let mut no_username = claims();
        no_username.as_object_mut().unwrap().remove("username");
        let mut other_issuer = claims();
        other_issuer["iss"] = json!("https://other.example.com");

        let forged = Signer::new("k1").sign(claims());

        for token in [
            "not-a-jwt".to_string(),
            signer.sign(wrong_aud),
            signer.sign(expired),
            signer.sign(no_username),
            signer.sign(other_issuer),
            forged,
        ] {
            assert_eq!(
                authenticate(&auth, &token).await.unwrap(),
                AuthenticationOutcome::NotAuthenticated,
                "token should be rejected: {token}"
            );
        }
    }

    #[tokio::test]
    async fn rsa_signed_tokens_authenticate() {
        let signer = RsaSigner::new("rsa-1");
        let auth = setup_keys(vec![signer.jwk()]);

        for alg in ["RS256", "RS384", "RS512"] {
            let outcome = authenticate(&auth, &signer.sign(alg, claims())).await.unwrap();
            assert_eq!(
                outcome.user().map(|u| u.username.as_str()),
                Some("alice@example.com"),
                "{alg} token should authenticate"
            );
        }
    }

    #[tokio::test]
    async fn rsa_tampered_signature_is_not_authenticated() {
        let signer = RsaSigner::new("rsa-1");
        let auth = setup_keys(vec![signer.jwk()]);

        let token = signer.sign("RS256", claims());
        let (input, sig) = token.rsplit_once('.').unwrap();
        let mut sig = URL_SAFE_NO_PAD.decode(sig).unwrap();
        sig[0] ^= 0x01;
        let tampered = format!("{input}.{}", URL_SAFE_NO_PAD.encode(&sig));

        assert_eq!(
            authenticate(&auth, &tampered).await.unwrap(),
            AuthenticationOutcome::NotAuthenticated
        );

        let mut other_claims = claims();
        other_claims["username"] = json!("mallory@example.com");
        let other_token = signer.sign("RS256", other_claims);
        let other_payload = other_token.split('.').nth(1).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let swapped = format!("{}.{other_payload}.{}", parts[0], parts[2]);

        assert_eq!(
            authenticate(&auth, &swapped).await.unwrap(),
            AuthenticationOutcome::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn unknown_kid_is_not_authenticated() {
        let signer = Signer::new("k1");
        let (_, auth) = setup(&signer);
        let other = Signer::new("k2");

        assert_eq!(
            authenticate(&auth, &other.sign(claims())).await.unwrap(),
            AuthenticationOutcome::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn missing_issuer_keys_is_an_error() {
        let signer = Signer::new("k1");
        let (store, auth) = setup(&signer);
        store.set_issuer_to_jwks_map(HashMap::new());

        let err = authenticate(&auth, &signer.sign(claims())).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownIssuer { issuer } if issuer == ISSUER));
    }

    #[tokio::test]
    async fn rotated_keys_apply_to_next_token() {
        let old = Signer::new("old");
        let (store, auth) = setup(&old);
        let new = Signer::new("new");

        assert_eq!(
            authenticate(&auth, &new.sign(claims())).await.unwrap(),
            AuthenticationOutcome::NotAuthenticated
        );

        store.set_issuer_to_jwks_map(HashMap::from([(
            ISSUER.to_string(),
            JwkSet {
                keys: vec![new.jwk()],
            },
        )]));

        assert!(authenticate(&auth, &new.sign(claims()))
            .await
            .unwrap()
            .user()
            .is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let signer = Signer::new("k1");
        let (_, auth) = setup(&signer);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = auth
            .authenticate(&cancel, &signer.sign(claims()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn empty_issuer_or_audience_is_rejected() {
        let store = Arc::new(IssuerJwksStore::new());
        assert!(JwtTokenAuthenticator::new(
            JwtTokenAuthenticatorConfig::new("", "concord"),
            store.clone()
        )
        .is_err());
        assert!(JwtTokenAuthenticator::new(JwtTokenAuthenticatorConfig::new(ISSUER, ""), store).is_err());
    }
}
