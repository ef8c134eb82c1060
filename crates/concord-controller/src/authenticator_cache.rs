//! Controllers that keep the authenticator registry current
//!
//! One controller per authenticator kind. A sync looks the resource up in the
//! informer cache: a present resource is built into an authenticator and
//! registered, an absent one is unregistered. A resource that cannot be built
//! is unregistered and logged rather than retried, since retrying cannot fix
//! its spec.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use concord_auth::{
    AuthError, Authenticator, AuthenticatorKey, AuthenticatorKind, AuthenticatorRegistry,
    IssuerJwksStore, JwtTokenAuthenticator, JwtTokenAuthenticatorConfig, WebhookTokenAuthenticator,
};
use concord_common::crd::{JWTAuthenticator, WebhookAuthenticator};
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::engine::{match_anything, Controller, ControllerConfig, Key, Syncer};
use crate::error::SyncError;
use crate::informer::SharedInformer;

/// Name of the WebhookAuthenticator cache controller
pub const WEBHOOK_CONTROLLER_NAME: &str = "webhook-authenticator-cache-controller";

/// Name of the JWTAuthenticator cache controller
pub const JWT_CONTROLLER_NAME: &str = "jwt-authenticator-cache-controller";

type BuildFn<T> = Box<dyn Fn(&T) -> Result<Arc<dyn Authenticator>, AuthError> + Send + Sync>;

/// Syncs one authenticator kind into the registry
pub struct AuthenticatorCacheSyncer<T> {
    kind: AuthenticatorKind,
    informer: Arc<SharedInformer<T>>,
    registry: Arc<AuthenticatorRegistry>,
    build: BuildFn<T>,
    /// Resource version each registered authenticator was built from
    built: Mutex<HashMap<String, Option<String>>>,
}

impl<T> AuthenticatorCacheSyncer<T>
where
    T: Resource + Send + Sync + 'static,
{
    /// Create a syncer that turns resources into authenticators with `build`
    pub fn new<F>(
        kind: AuthenticatorKind,
        informer: Arc<SharedInformer<T>>,
        registry: Arc<AuthenticatorRegistry>,
        build: F,
    ) -> Self
    where
        F: Fn(&T) -> Result<Arc<dyn Authenticator>, AuthError> + Send + Sync + 'static,
    {
        Self {
            kind,
            informer,
            registry,
            build: Box::new(build),
            built: Mutex::new(HashMap::new()),
        }
    }

    fn unregister(&self, key: &AuthenticatorKey) -> bool {
        self.built.lock().remove(&key.name);
        self.registry.remove(key)
    }
}

#[async_trait]
impl<T> Syncer for AuthenticatorCacheSyncer<T>
where
    T: Resource + Send + Sync + 'static,
{
    async fn sync(&self, key: &Key) -> Result<(), SyncError> {
        let registry_key = AuthenticatorKey::new(self.kind, key.name.as_str());

        let Some(obj) = self.informer.get(None, &key.name) else {
            if self.unregister(&registry_key) {
                info!(authenticator = %registry_key, "Removed authenticator");
            }
            return Ok(());
        };

        let version = obj.resource_version();
        if self.built.lock().get(&key.name) == Some(&version)
            && self.registry.get(&registry_key).is_some()
        {
            return Ok(());
        }

        match (self.build)(obj.as_ref()) {
            Ok(authenticator) => {
                self.registry.insert(registry_key.clone(), authenticator);
                self.built.lock().insert(key.name.clone(), version);
                info!(authenticator = %registry_key, "Registered authenticator");
            }
            Err(e) => {
                self.unregister(&registry_key);
                warn!(
                    authenticator = %registry_key,
                    error = %e,
                    "Invalid authenticator configuration, not serving it"
                );
            }
        }
        Ok(())
    }
}

/// Build a webhook authenticator from its resource
pub fn build_webhook_authenticator(
    obj: &WebhookAuthenticator,
    timeout: Duration,
) -> Result<Arc<dyn Authenticator>, AuthError> {
    let ca_bundle = obj
        .spec
        .tls
        .as_ref()
        .and_then(|tls| tls.certificate_authority_data.as_deref())
        .filter(|data| !data.is_empty())
        .map(|data| {
            STANDARD
                .decode(data)
                .map_err(|e| AuthError::configuration(format!("certificateAuthorityData: {e}")))
        })
        .transpose()?;

    let authenticator =
        WebhookTokenAuthenticator::new(&obj.spec.endpoint, ca_bundle.as_deref(), timeout)?;
    Ok(Arc::new(authenticator))
}

/// Build a JWT authenticator from its resource
pub fn build_jwt_authenticator(
    obj: &JWTAuthenticator,
    store: Arc<IssuerJwksStore>,
) -> Result<Arc<dyn Authenticator>, AuthError> {
    let mut config = JwtTokenAuthenticatorConfig::new(&obj.spec.issuer, &obj.spec.audience);
    if !obj.spec.claims.username.is_empty() {
        config.username_claim = obj.spec.claims.username.clone();
    }
    if !obj.spec.claims.groups.is_empty() {
        config.groups_claim = obj.spec.claims.groups.clone();
    }
    let authenticator = JwtTokenAuthenticator::new(config, store)?;
    Ok(Arc::new(authenticator))
}

fn cluster_key<T: Resource>(obj: &T) -> Option<Key> {
    Some(Key::cluster(&obj.name_any()))
}

/// Build the WebhookAuthenticator cache controller
pub fn new_webhook_cache_controller(
    informer: Arc<SharedInformer<WebhookAuthenticator>>,
    registry: Arc<AuthenticatorRegistry>,
    webhook_timeout: Duration,
    config: ControllerConfig,
) -> Controller {
    let syncer = AuthenticatorCacheSyncer::new(
        AuthenticatorKind::Webhook,
        informer.clone(),
        registry,
        move |obj: &WebhookAuthenticator| build_webhook_authenticator(obj, webhook_timeout),
    );
    Controller::new(WEBHOOK_CONTROLLER_NAME, Arc::new(syncer))
        .with_config(config)
        .watches(informer, match_anything, cluster_key)
}

/// Build the JWTAuthenticator cache controller
pub fn new_jwt_cache_controller(
    informer: Arc<SharedInformer<JWTAuthenticator>>,
    registry: Arc<AuthenticatorRegistry>,
    store: Arc<IssuerJwksStore>,
    config: ControllerConfig,
) -> Controller {
    let syncer = AuthenticatorCacheSyncer::new(
        AuthenticatorKind::Jwt,
        informer.clone(),
        registry,
        move |obj: &JWTAuthenticator| build_jwt_authenticator(obj, store.clone()),
    );
    Controller::new(JWT_CONTROLLER_NAME, Arc::new(syncer))
        .with_config(config)
        .watches(informer, match_anything, cluster_key)
}
