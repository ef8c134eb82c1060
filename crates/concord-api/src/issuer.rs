//! Short-lived client certificate issuance
//!
//! After a token is authenticated the broker hands back a client certificate
//! signed by a CA the cluster's apiserver trusts. The certificate subject
//! carries the username as its common name.
//!
//! Groups are returned in the response's `user.groups` but are not written
//! into the certificate subject: rcgen's distinguished name holds one value
//! per attribute type, so it cannot express one `O=` entry per group.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use time::OffsetDateTime;

#[cfg(test)]
use mockall::automock;

use concord_auth::UserInfo;

/// Default lifetime of issued certificates
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(300);

/// How far `notBefore` is backdated to tolerate clock skew
pub const NOT_BEFORE_BACKDATE: Duration = Duration::from_secs(5 * 60);

/// Common name of the ephemeral CA created when none is configured
const EPHEMERAL_CA_COMMON_NAME: &str = "concord-client-ca";

/// Credential issuance errors
#[derive(Debug, Error)]
pub enum IssuerError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing the certificate failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// The configured CA material could not be parsed
    #[error("invalid CA: {0}")]
    InvalidCa(String),
}

/// A freshly issued client credential
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// PEM-encoded client certificate
    pub certificate_pem: String,
    /// PEM-encoded private key for the certificate
    pub private_key_pem: String,
    /// End of the certificate's validity
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues a short-lived credential for an authenticated identity
#[cfg_attr(test, automock)]
pub trait CredentialIssuer: Send + Sync {
    /// Issue a credential for `user`
    fn issue(&self, user: &UserInfo) -> Result<IssuedCredential, IssuerError>;
}

/// Client certificate issuer configuration
#[derive(Clone, Debug)]
pub struct IssuerConfig {
    /// Lifetime of issued certificates
    pub ttl: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CREDENTIAL_TTL,
        }
    }
}

/// Signs client certificates with a CA key
///
/// The CA certificate and key are parsed once, when the issuer is built.
pub struct ClientCertIssuer {
    ca_cert_pem: String,
    issuer: Issuer<'static, KeyPair>,
    ttl: Duration,
}

impl ClientCertIssuer {
    /// Use an existing CA certificate and key
    pub fn from_pem(
        ca_cert_pem: &str,
        ca_key_pem: &str,
        config: IssuerConfig,
    ) -> Result<Self, IssuerError> {
        let key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| IssuerError::InvalidCa(format!("failed to parse CA key: {}", e)))?;
        Self::with_signing_key(ca_cert_pem.to_string(), key, config)
    }

    /// Generate a throwaway self-signed CA
    ///
    /// Certificates from an ephemeral CA are only useful once its certificate
    /// has been handed to the apiserver; see [`ClientCertIssuer::ca_cert_pem`].
    pub fn ephemeral(config: IssuerConfig) -> Result<Self, IssuerError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(EPHEMERAL_CA_COMMON_NAME.to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = Utc::now().timestamp();
        params.not_before = unix_time(now - NOT_BEFORE_BACKDATE.as_secs() as i64)?;
        params.not_after = unix_time(now + 365 * 24 * 60 * 60)?;

        let key = KeyPair::generate().map_err(|e| {
            IssuerError::KeyGeneration(format!("failed to generate CA key: {}", e))
        })?;
        let cert = params.self_signed(&key).map_err(|e| {
            IssuerError::CertificateGeneration(format!("failed to create CA cert: {}", e))
        })?;

        Self::with_signing_key(cert.pem(), key, config)
    }

    fn with_signing_key(
        ca_cert_pem: String,
        key: KeyPair,
        config: IssuerConfig,
    ) -> Result<Self, IssuerError> {
        let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, key)
            .map_err(|e| IssuerError::InvalidCa(format!("failed to parse CA cert: {}", e)))?;
        Ok(Self {
            ca_cert_pem,
            issuer,
            ttl: config.ttl,
        })
    }

    /// PEM-encoded certificate of the signing CA
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Lifetime of issued certificates
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn issue_at(&self, user: &UserInfo, now: i64) -> Result<IssuedCredential, IssuerError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(user.username.clone()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let expires_at = now + self.ttl.as_secs() as i64;
        params.not_before = unix_time(now - NOT_BEFORE_BACKDATE.as_secs() as i64)?;
        params.not_after = unix_time(expires_at)?;

        let key = KeyPair::generate().map_err(|e| {
            IssuerError::KeyGeneration(format!("failed to generate client key: {}", e))
        })?;

        let cert = params.signed_by(&key, &self.issuer).map_err(|e| {
            IssuerError::CertificateGeneration(format!("failed to sign certificate: {}", e))
        })?;

        let expires_at = DateTime::<Utc>::from_timestamp(expires_at, 0).ok_or_else(|| {
            IssuerError::CertificateGeneration(format!(
                "expiration {} out of range",
                expires_at
            ))
        })?;

        Ok(IssuedCredential {
            certificate_pem: cert.pem(),
            private_key_pem: key.serialize_pem(),
            expires_at,
        })
    }
}

impl CredentialIssuer for ClientCertIssuer {
    fn issue(&self, user: &UserInfo) -> Result<IssuedCredential, IssuerError> {
        self.issue_at(user, Utc::now().timestamp())
    }
}

fn unix_time(secs: i64) -> Result<OffsetDateTime, IssuerError> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| IssuerError::CertificateGeneration(format!("invalid validity time: {}", e)))
}
