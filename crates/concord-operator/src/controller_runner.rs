//! Wires informers, controllers and the credential request server together
//!
//! Everything shares one shutdown token. Informers are started first so the
//! controllers can wait for their initial listings.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use concord_api::{start_server, ClientCertIssuer, CredentialRequestHandler, ServerConfig};
use concord_auth::{AuthenticatorRegistry, IssuerJwksStore};
use concord_common::crd::{JWTAuthenticator, OIDCProvider, WebhookAuthenticator};
use concord_controller::authenticator_cache::{
    new_jwt_cache_controller, new_webhook_cache_controller, JWT_CONTROLLER_NAME,
    WEBHOOK_CONTROLLER_NAME,
};
use concord_controller::informer::run_watcher;
use concord_controller::jwks_observer::{self, new_jwks_observer_controller};
use concord_controller::SharedInformer;

use crate::config::RunArgs;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Controllers started by [`build_controllers`], in start order
pub const CONTROLLER_NAMES: [&str; 3] = [
    jwks_observer::CONTROLLER_NAME,
    WEBHOOK_CONTROLLER_NAME,
    JWT_CONTROLLER_NAME,
];

/// Informers shared by every controller
pub struct Informers {
    /// OIDCProvider resources in the operating namespace
    pub providers: Arc<SharedInformer<OIDCProvider>>,
    /// Secrets in the operating namespace
    pub secrets: Arc<SharedInformer<Secret>>,
    /// Cluster-scoped WebhookAuthenticator resources
    pub webhooks: Arc<SharedInformer<WebhookAuthenticator>>,
    /// Cluster-scoped JWTAuthenticator resources
    pub jwts: Arc<SharedInformer<JWTAuthenticator>>,
}

impl Informers {
    /// Create empty informers
    pub fn new() -> Self {
        Self {
            providers: Arc::new(SharedInformer::new("OIDCProvider")),
            secrets: Arc::new(SharedInformer::new("Secret")),
            webhooks: Arc::new(SharedInformer::new("WebhookAuthenticator")),
            jwts: Arc::new(SharedInformer::new("JWTAuthenticator")),
        }
    }

    /// Watch tasks feeding each informer
    pub fn watch_tasks(
        &self,
        client: &Client,
        namespace: &str,
        shutdown: &CancellationToken,
    ) -> Vec<BoxedTask> {
        let mut tasks: Vec<BoxedTask> = Vec::with_capacity(4);
        tasks.push(Box::pin(run_watcher(
            self.providers.clone(),
            Api::namespaced(client.clone(), namespace),
            shutdown.clone(),
        )));
        tasks.push(Box::pin(run_watcher(
            self.secrets.clone(),
            Api::namespaced(client.clone(), namespace),
            shutdown.clone(),
        )));
        tasks.push(Box::pin(run_watcher(
            self.webhooks.clone(),
            Api::all(client.clone()),
            shutdown.clone(),
        )));
        tasks.push(Box::pin(run_watcher(
            self.jwts.clone(),
            Api::all(client.clone()),
            shutdown.clone(),
        )));
        tasks
    }
}

impl Default for Informers {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the controllers and the request handler
pub struct BrokerState {
    /// Issuer to JWKS map written by the JWKS observer
    pub store: Arc<IssuerJwksStore>,
    /// Live authenticators written by the cache controllers
    pub registry: Arc<AuthenticatorRegistry>,
}

impl BrokerState {
    /// Create empty state
    pub fn new() -> Self {
        Self {
            store: Arc::new(IssuerJwksStore::new()),
            registry: Arc::new(AuthenticatorRegistry::new()),
        }
    }
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller futures for the JWKS observer and both authenticator caches
pub fn build_controllers(
    args: &RunArgs,
    informers: &Informers,
    state: &BrokerState,
    shutdown: &CancellationToken,
) -> Vec<BoxedTask> {
    let config = args.controller_config();

    tracing::info!(namespace = %args.namespace, "- JWKS observer controller");
    let jwks_observer = new_jwks_observer_controller(
        informers.providers.clone(),
        informers.secrets.clone(),
        state.store.clone(),
        config.clone(),
    );

    tracing::info!("- WebhookAuthenticator cache controller");
    let webhook_cache = new_webhook_cache_controller(
        informers.webhooks.clone(),
        state.registry.clone(),
        args.webhook_timeout(),
        config.clone(),
    );

    tracing::info!("- JWTAuthenticator cache controller");
    let jwt_cache = new_jwt_cache_controller(
        informers.jwts.clone(),
        state.registry.clone(),
        state.store.clone(),
        config,
    );

    let mut controllers: Vec<BoxedTask> = Vec::with_capacity(3);
    controllers.push(Box::pin(jwks_observer.run(shutdown.clone())));
    controllers.push(Box::pin(webhook_cache.run(shutdown.clone())));
    controllers.push(Box::pin(jwt_cache.run(shutdown.clone())));
    controllers
}

/// Run the broker until `shutdown` fires or the server fails
pub async fn run(
    client: Client,
    args: RunArgs,
    issuer: ClientCertIssuer,
    server_config: ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let informers = Informers::new();
    let state = BrokerState::new();

    tracing::info!("Starting informers...");
    let mut tasks = informers.watch_tasks(&client, &args.namespace, &shutdown);

    tracing::info!("Starting controllers...");
    tasks.extend(build_controllers(&args, &informers, &state, &shutdown));

    let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();

    let handler = Arc::new(CredentialRequestHandler::new(
        state.registry.clone(),
        Arc::new(issuer),
    ));
    let result = start_server(server_config, handler, shutdown.clone()).await;

    // A failed server takes the controllers down with it.
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    result.map_err(Into::into)
}
