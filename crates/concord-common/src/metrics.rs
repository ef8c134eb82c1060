//! OpenTelemetry metrics for the broker
//!
//! These instruments are the operator-facing view of outcomes that callers
//! cannot distinguish: a credential request that failed because the token
//! was rejected and one that failed because the authenticator was
//! unreachable both answer "authentication failed", but are counted apart.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("concord"));

/// Counter of credential requests by result
///
/// Labels:
/// - `result`: see [`CredentialRequestResult`]
pub static CREDENTIAL_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("concord_credential_requests_total")
        .with_description("Total number of credential requests by result")
        .with_unit("{requests}")
        .build()
});

/// Counter of controller sync invocations
///
/// Labels:
/// - `controller`: controller name
/// - `result`: success, error
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("concord_reconcile_total")
        .with_description("Total number of controller sync invocations")
        .with_unit("{syncs}")
        .build()
});

/// Gauge of issuers in the last published JWKS map
pub static JWKS_ISSUERS: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("concord_jwks_issuers")
        .with_description("Number of issuers in the published JWKS map")
        .with_unit("{issuers}")
        .build()
});

/// Outcome label for [`CREDENTIAL_REQUESTS`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialRequestResult {
    /// A credential was issued
    Success,
    /// The authenticator rejected the token
    Rejected,
    /// The authenticator could not be reached or errored
    AuthenticatorError,
    /// Authentication succeeded but no credential could be issued
    IssuerError,
    /// The request failed validation
    Invalid,
}

impl CredentialRequestResult {
    /// Label value for this result
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::AuthenticatorError => "authenticator_error",
            Self::IssuerError => "issuer_error",
            Self::Invalid => "invalid",
        }
    }
}

/// Record one credential request outcome
pub fn record_credential_request(result: CredentialRequestResult) {
    CREDENTIAL_REQUESTS.add(1, &[KeyValue::new("result", result.as_str())]);
}

/// Record one controller sync outcome
pub fn record_reconcile(controller: &str, success: bool) {
    let result = if success { "success" } else { "error" };
    RECONCILE_TOTAL.add(
        1,
        &[
            KeyValue::new("controller", controller.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

/// Record the size of a freshly published JWKS map
pub fn record_jwks_issuers(count: usize) {
    JWKS_ISSUERS.record(count as u64, &[]);
}
