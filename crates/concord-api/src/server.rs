//! HTTP boundary for credential requests
//!
//! Serves the TokenCredentialRequest create call the way an aggregated API
//! would: cluster-scoped and namespaced POST paths, `?dryRun`, and Kubernetes
//! `Status` bodies for errors. Both successful and failed authentications
//! answer 201 Created.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use concord_common::LOGIN_API_GROUP;

use crate::error::ApiError;
use crate::handler::CredentialRequestHandler;
use crate::types::{TokenCredentialRequest, API_VERSION};
use crate::validation::CreateOptions;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8443";

/// How long in-flight requests get to finish after shutdown begins
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// TLS material could not be loaded
    #[error("TLS config error: {0}")]
    Tls(String),

    /// Binding or serving failed
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// PEM-encoded serving certificate and key
#[derive(Clone)]
pub struct TlsConfig {
    /// Certificate chain PEM
    pub cert_pem: Vec<u8>,
    /// Private key PEM
    pub key_pem: Vec<u8>,
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// Serve HTTPS with this material; plain HTTP when absent
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            tls: None,
        }
    }
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Credential request handler
    pub handler: Arc<CredentialRequestHandler>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQuery {
    #[serde(default)]
    dry_run: Option<String>,
}

impl CreateQuery {
    fn options(&self) -> CreateOptions {
        let dry_run = self
            .dry_run
            .iter()
            .flat_map(|v| v.split(','))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        CreateOptions { dry_run }
    }
}

/// Path of the cluster-scoped create call
pub fn credential_requests_path() -> String {
    format!(
        "/apis/{}/{}/tokencredentialrequests",
        LOGIN_API_GROUP, API_VERSION
    )
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let cluster_path = credential_requests_path();
    let namespaced_path = format!(
        "/apis/{}/{}/namespaces/{{namespace}}/tokencredentialrequests",
        LOGIN_API_GROUP, API_VERSION
    );

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(&cluster_path, post(create_cluster_scoped))
        .route(&namespaced_path, post(create_namespaced))
        .with_state(state)
}

async fn create_cluster_scoped(
    State(state): State<AppState>,
    Query(query): Query<CreateQuery>,
    body: Bytes,
) -> Response {
    create(state, None, query, body).await
}

async fn create_namespaced(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<CreateQuery>,
    body: Bytes,
) -> Response {
    create(state, Some(namespace), query, body).await
}

async fn create(
    state: AppState,
    namespace: Option<String>,
    query: CreateQuery,
    body: Bytes,
) -> Response {
    let request: TokenCredentialRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return ApiError::BadRequest(format!("failed to decode request body: {}", e))
                .into_response()
        }
    };
    debug!(namespace = ?namespace, name = %request.name(), "credential request");

    // Fires when the connection goes away and this future is dropped.
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    match state
        .handler
        .create(&cancel, request, &query.options())
        .await
    {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Serve until `shutdown` fires
pub async fn start_server(
    config: ServerConfig,
    handler: Arc<CredentialRequestHandler>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = router(AppState { handler });

    let handle = Handle::new();
    let graceful = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        graceful.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });

    match config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem(tls.cert_pem, tls.key_pem)
                .await
                .map_err(|e| ServerError::Tls(e.to_string()))?;

            info!(addr = %config.addr, "Starting credential request server (https)");
            axum_server::bind_rustls(config.addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(addr = %config.addr, "Starting credential request server (http)");
            axum_server::bind(config.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("Credential request server stopped");
    Ok(())
}
