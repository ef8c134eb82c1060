//! Credential request handler
//!
//! Turns a validated [`TokenCredentialRequest`] into either a credential or
//! the generic failure response. Rejected tokens, unreachable authenticators
//! and issuance failures all produce the same failure body; the difference is
//! only visible in logs and metrics.

use std::sync::Arc;

use chrono::SecondsFormat;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

use concord_auth::{AuthenticationOutcome, AuthenticatorKey, AuthenticatorRegistry};
use concord_common::metrics::{record_credential_request, CredentialRequestResult};
use concord_common::telemetry::CREDENTIAL_REQUEST_SPAN;

use crate::admission::CreateValidator;
use crate::error::Result;
use crate::issuer::CredentialIssuer;
use crate::types::{ClusterCredential, TokenCredentialRequest, User};
use crate::validation::{validate_options, validate_request, CreateOptions};

/// Longest authenticator diagnostic written to the log
const MAX_DIAGNOSTIC_LEN: usize = 256;

/// Handles TokenCredentialRequest creation
pub struct CredentialRequestHandler {
    registry: Arc<AuthenticatorRegistry>,
    issuer: Arc<dyn CredentialIssuer>,
    validators: Vec<Arc<dyn CreateValidator>>,
}

impl CredentialRequestHandler {
    /// Create a handler resolving authenticators from `registry`
    pub fn new(registry: Arc<AuthenticatorRegistry>, issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self {
            registry,
            issuer,
            validators: Vec::new(),
        }
    }

    /// Add a pre-flight validator; validators run in registration order
    pub fn with_validator(mut self, validator: Arc<dyn CreateValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Answer one credential request
    ///
    /// Returns `Err` only for caller input errors and validator refusals.
    /// Every authentication outcome, good or bad, is `Ok`.
    ///
    /// `cancel` is the caller's token. The authenticator never sees it
    /// directly; it gets a derived token that follows `cancel` and is also
    /// cancelled when this call returns.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        request: TokenCredentialRequest,
        options: &CreateOptions,
    ) -> Result<TokenCredentialRequest> {
        if let Err(err) = validate_request(&request) {
            record_credential_request(CredentialRequestResult::Invalid);
            return Err(err);
        }

        for validator in &self.validators {
            if let Err(err) = validator.validate(request.clone()).await {
                record_credential_request(CredentialRequestResult::Invalid);
                return Err(err);
            }
        }

        if let Err(err) = validate_options(&request, options) {
            record_credential_request(CredentialRequestResult::Invalid);
            return Err(err);
        }

        let auth_cancel = derive_cancellation(cancel);
        let _cleanup = auth_cancel.clone().drop_guard();

        let span = info_span!(
            CREDENTIAL_REQUEST_SPAN,
            request = request.name(),
            authenticator = field::Empty,
        );
        let (response, result) = self
            .authenticate(&auth_cancel, &request)
            .instrument(span)
            .await;
        record_credential_request(result);
        Ok(response)
    }

    async fn authenticate(
        &self,
        cancel: &CancellationToken,
        request: &TokenCredentialRequest,
    ) -> (TokenCredentialRequest, CredentialRequestResult) {
        let failure = |result| (TokenCredentialRequest::failure(), result);

        let key = request.spec.authenticator.as_ref().and_then(|r| {
            AuthenticatorKey::from_reference(r.api_group.as_deref(), &r.kind, &r.name)
        });
        let Some(key) = key else {
            warn!(
                reference = ?request.spec.authenticator,
                "credential request does not reference a known authenticator kind"
            );
            return failure(CredentialRequestResult::AuthenticatorError);
        };
        Span::current().record("authenticator", field::display(&key));
        let Some(authenticator) = self.registry.get(&key) else {
            warn!(authenticator = %key, "referenced authenticator is not loaded");
            return failure(CredentialRequestResult::AuthenticatorError);
        };

        let token = request.token().unwrap_or_default();
        let user = match authenticator.authenticate(cancel, token).await {
            Ok(AuthenticationOutcome::Authenticated(user)) => user,
            Ok(AuthenticationOutcome::NotAuthenticated) => {
                debug!(authenticator = %key, "token rejected");
                return failure(CredentialRequestResult::Rejected);
            }
            Err(err) => {
                warn!(
                    authenticator = %key,
                    error = %truncate_diagnostic(&err.to_string()),
                    cancelled = err.is_cancelled(),
                    "authenticator failed"
                );
                return failure(CredentialRequestResult::AuthenticatorError);
            }
        };

        let issued = match self.issuer.issue(&user) {
            Ok(issued) => issued,
            Err(err) => {
                warn!(
                    authenticator = %key,
                    user = %user.username,
                    error = %err,
                    "failed to issue credential"
                );
                return failure(CredentialRequestResult::IssuerError);
            }
        };

        info!(
            authenticator = %key,
            user = %user.username,
            expires_at = %issued.expires_at,
            "issued credential"
        );

        let credential = ClusterCredential {
            expiration_timestamp: Some(
                issued
                    .expires_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            token: None,
            client_certificate_data: Some(issued.certificate_pem),
            client_key_data: Some(issued.private_key_pem),
        };
        let user = User {
            name: user.username,
            groups: user.groups,
        };
        (
            TokenCredentialRequest::success(credential, user),
            CredentialRequestResult::Success,
        )
    }
}

/// A token cancelled when `caller` is, that can also be cancelled on its own
///
/// The watcher task exits as soon as either token fires.
fn derive_cancellation(caller: &CancellationToken) -> CancellationToken {
    let derived = CancellationToken::new();
    if caller.is_cancelled() {
        derived.cancel();
        return derived;
    }

    let caller = caller.clone();
    let watched = derived.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = caller.cancelled() => watched.cancel(),
            _ = watched.cancelled() => {}
        }
    });
    derived
}

fn truncate_diagnostic(message: &str) -> String {
    if message.len() <= MAX_DIAGNOSTIC_LEN {
        return message.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
