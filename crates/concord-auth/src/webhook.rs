//! Authenticator that delegates to an external TokenReview webhook
//!
//! The token is POSTed as an `authentication.k8s.io/v1` `TokenReview`; the
//! webhook's `status` decides the outcome. The call is raced against the
//! caller's cancellation token and abandoned when it fires.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::authenticator::{AuthenticationOutcome, Authenticator, UserInfo};
use crate::error::{AuthError, Result};

/// Default upper bound on one webhook round trip
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Only the status of the webhook's answer is used
#[derive(Debug, Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: Option<TokenReviewStatus>,
}

/// Authenticates tokens by asking a TokenReview webhook
#[derive(Debug, Clone)]
pub struct WebhookTokenAuthenticator {
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

impl WebhookTokenAuthenticator {
    /// Create an authenticator for `endpoint`
    ///
    /// When `ca_bundle_pem` is given, only those certificates are trusted for
    /// the webhook's TLS connection.
    pub fn new(endpoint: &str, ca_bundle_pem: Option<&[u8]>, timeout: Duration) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| AuthError::configuration(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if !matches!(endpoint.scheme(), "https" | "http") {
            return Err(AuthError::configuration(format!(
                "unsupported endpoint scheme {}",
                endpoint.scheme()
            )));
        }

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_bundle_pem {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| AuthError::configuration(format!("invalid CA bundle: {e}")))?;
            if certs.is_empty() {
                return Err(AuthError::configuration("CA bundle contains no certificates"));
            }
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { endpoint, client })
    }

    /// Webhook URL
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn review(&self, token: &str) -> Result<AuthenticationOutcome> {
        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: None,
            },
            status: None,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&review)
            .send()
            .await
            .map_err(|e| AuthError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::BadStatus {
                status: status.as_u16(),
            });
        }

        let body: TokenReviewResponse = response
            .json()
            .await
            .map_err(|e| AuthError::malformed(e.to_string()))?;
        let status = body
            .status
            .ok_or_else(|| AuthError::malformed("TokenReview has no status"))?;

        outcome_from_status(status)
    }
}

#[async_trait]
impl Authenticator for WebhookTokenAuthenticator {
    async fn authenticate(
        &self,
        cancel: &CancellationToken,
        token: &str,
    ) -> Result<AuthenticationOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(endpoint = %self.endpoint, "webhook call abandoned on cancellation");
                Err(AuthError::Cancelled)
            }
            result = self.review(token) => result,
        }
    }
}

/// Map a webhook verdict to an outcome
fn outcome_from_status(status: TokenReviewStatus) -> Result<AuthenticationOutcome> {
    if !status.authenticated.unwrap_or(false) {
        debug!(error = ?status.error, "webhook rejected token");
        return Ok(AuthenticationOutcome::NotAuthenticated);
    }

    let user = status
        .user
        .ok_or_else(|| AuthError::malformed("authenticated TokenReview has no user"))?;
    let username = user
        .username
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AuthError::malformed("authenticated TokenReview has no username"))?;

    Ok(AuthenticationOutcome::Authenticated(UserInfo {
        username,
        groups: user.groups.unwrap_or_default(),
        extra: user.extra.unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use k8s_openapi::api::authentication::v1::UserInfo as K8sUserInfo;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/authenticate")
    }

    async fn review_handler(Json(review): Json<TokenReview>) -> Json<TokenReview> {
        let authenticated = review.spec.token.as_deref() == Some("good-token");
        let user = authenticated.then(|| K8sUserInfo {
            username: Some("alice".to_string()),
            groups: Some(vec!["devs".to_string(), "devs".to_string()]),
            extra: Some(BTreeMap::from([(
                "scopes".to_string(),
                vec!["read".to_string(), "write".to_string()],
            )])),
            uid: None,
        });
        Json(TokenReview {
            metadata: Default::default(),
            spec: review.spec,
            status: Some(TokenReviewStatus {
                authenticated: Some(authenticated),
                user,
                error: (!authenticated).then(|| "invalid token".to_string()),
                audiences: None,
            }),
        })
    }

    fn authenticator(endpoint: &str) -> WebhookTokenAuthenticator {
        WebhookTokenAuthenticator::new(endpoint, None, DEFAULT_WEBHOOK_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn accepted_token_maps_user() {
        let endpoint = serve(Router::new().route("/authenticate", post(review_handler))).await;
        let auth = authenticator(&endpoint);

        let outcome = auth
            .authenticate(&CancellationToken::new(), "good-token")
            .await
            .unwrap();

        let user = outcome.user().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.groups, vec!["devs", "devs"]);
        assert_eq!(user.extra["scopes"], vec!["read", "write"]);
    }

    #[tokio::test]
    async fn rejected_token_is_not_authenticated() {
        let endpoint = serve(Router::new().route("/authenticate", post(review_handler))).await;
        let auth = authenticator(&endpoint);

        let outcome = auth
            .authenticate(&CancellationToken::new(), "bad-token")
            .await
            .unwrap();
        assert_eq!(outcome, AuthenticationOutcome::NotAuthenticated);
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let endpoint = serve(Router::new().route(
            "/authenticate",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let auth = authenticator(&endpoint);

        let err = auth
            .authenticate(&CancellationToken::new(), "good-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadStatus { status: 503 }));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let endpoint = serve(Router::new().route(
            "/authenticate",
            post(|| async { "definitely not json" }),
        ))
        .await;
        let auth = authenticator(&endpoint);

        let err = auth
            .authenticate(&CancellationToken::new(), "good-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let auth = authenticator(&format!("http://{addr}/authenticate"));

        let err = auth
            .authenticate(&CancellationToken::new(), "good-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn cancellation_abandons_slow_webhook() {
        let router = Router::new().route(
            "/authenticate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::OK
            }),
        );
        let endpoint = serve(router).await;
        let auth = authenticator(&endpoint);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = auth.authenticate(&cancel, "good-token").await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(WebhookTokenAuthenticator::new("not a url", None, DEFAULT_WEBHOOK_TIMEOUT).is_err());
        assert!(
            WebhookTokenAuthenticator::new("ftp://example.com", None, DEFAULT_WEBHOOK_TIMEOUT)
                .is_err()
        );
        assert!(WebhookTokenAuthenticator::new(
            "https://example.com",
            Some(b"not a pem"),
            DEFAULT_WEBHOOK_TIMEOUT
        )
        .is_err());
    }

    #[test]
    fn authenticated_without_username_is_malformed() {
        let status = TokenReviewStatus {
            authenticated: Some(true),
            user: Some(K8sUserInfo::default()),
            ..Default::default()
        };
        assert!(matches!(
            outcome_from_status(status),
            Err(AuthError::MalformedResponse(_))
        ));
    }
}
