//! Controller that publishes the issuer to JWKS map
//!
//! Any change to an `OIDCProvider` or a Secret in the operating namespace
//! triggers a full rebuild: every provider is paired with the Secret named in
//! its status, the `jwks` entry is parsed, and the resulting map replaces the
//! published one wholesale. A provider whose Secret is missing or unparseable
//! is left out without failing the rebuild.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use concord_auth::{IssuerToJwksMapSetter, JwkSet};
use concord_common::crd::OIDCProvider;
use concord_common::{metrics, JWKS_SECRET_KEY};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::engine::{match_anything, namespace_key, Controller, ControllerConfig, Key, Syncer};
use crate::error::SyncError;
use crate::informer::{LabelSelector, SharedInformer};

/// Controller name used in logs and metrics
pub const CONTROLLER_NAME: &str = "jwks-observer-controller";

/// Rebuilds the issuer to JWKS map for one namespace
pub struct JwksObserver {
    providers: Arc<SharedInformer<OIDCProvider>>,
    secrets: Arc<SharedInformer<Secret>>,
    store: Arc<dyn IssuerToJwksMapSetter>,
}

impl JwksObserver {
    /// Create the syncer
    pub fn new(
        providers: Arc<SharedInformer<OIDCProvider>>,
        secrets: Arc<SharedInformer<Secret>>,
        store: Arc<dyn IssuerToJwksMapSetter>,
    ) -> Self {
        Self {
            providers,
            secrets,
            store,
        }
    }

    /// Compute the map for `namespace` from cached state
    pub fn build_map(&self, namespace: &str) -> HashMap<String, JwkSet> {
        let mut issuer_to_jwks = HashMap::new();

        for provider in self.providers.list(Some(namespace), &LabelSelector::everything()) {
            let name = provider.name_any();
            let issuer = provider.spec.issuer.as_str();
            if issuer.is_empty() {
                debug!(namespace, oidc_provider = %name, "Skipping OIDCProvider without issuer");
                continue;
            }
            let Some(secret_name) = provider.jwks_secret_name() else {
                debug!(namespace, oidc_provider = %name, "Skipping OIDCProvider without JWKS secret");
                continue;
            };

            let Some(secret) = self.secrets.get(Some(namespace), secret_name) else {
                info!(
                    namespace,
                    oidc_provider = %name,
                    secret = %secret_name,
                    "Skipping OIDCProvider: JWKS secret not found"
                );
                continue;
            };

            let Some(data) = secret.data.as_ref().and_then(|d| d.get(JWKS_SECRET_KEY)) else {
                info!(
                    namespace,
                    oidc_provider = %name,
                    secret = %secret_name,
                    "Skipping OIDCProvider: JWKS secret has no jwks entry"
                );
                continue;
            };

            match JwkSet::parse(&data.0) {
                Ok(jwks) => {
                    issuer_to_jwks.insert(issuer.to_string(), jwks);
                }
                Err(e) => {
                    info!(
                        namespace,
                        oidc_provider = %name,
                        secret = %secret_name,
                        error = %e,
                        "Skipping OIDCProvider: failed to parse JWKS"
                    );
                }
            }
        }

        issuer_to_jwks
    }
}

#[async_trait]
impl Syncer for JwksObserver {
    async fn sync(&self, key: &Key) -> Result<(), SyncError> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| SyncError::failed(format!("key {key} has no namespace")))?;

        let issuer_to_jwks = self.build_map(namespace);

        info!(namespace, issuer_count = issuer_to_jwks.len(), "Updated the JWKS cache");
        metrics::record_jwks_issuers(issuer_to_jwks.len());
        self.store.set_issuer_to_jwks_map(issuer_to_jwks);
        Ok(())
    }
}

/// Build the JWKS observer controller
///
/// Both informers are expected to be scoped to the operating namespace; every
/// change in either one enqueues that namespace.
pub fn new_jwks_observer_controller(
    providers: Arc<SharedInformer<OIDCProvider>>,
    secrets: Arc<SharedInformer<Secret>>,
    store: Arc<dyn IssuerToJwksMapSetter>,
    config: ControllerConfig,
) -> Controller {
    let syncer = JwksObserver::new(providers.clone(), secrets.clone(), store);
    Controller::new(CONTROLLER_NAME, Arc::new(syncer))
        .with_config(config)
        .watches(providers, match_anything, namespace_key)
        .watches(secrets, match_anything, namespace_key)
}
