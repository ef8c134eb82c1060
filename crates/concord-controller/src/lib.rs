//! Reconciliation engine and controllers for the Concord identity broker
//!
//! The [`engine`] runs generic controllers: informer notifications become keys
//! on a deduplicating work queue, and a worker pool hands each key to a
//! [`Syncer`](engine::Syncer) with at most one worker per key at a time.
//!
//! Two kinds of controller are built on it:
//! - [`jwks_observer`] rebuilds the issuer to JWKS map from `OIDCProvider`
//!   resources and their Secrets
//! - [`authenticator_cache`] keeps the authenticator registry in step with
//!   `WebhookAuthenticator` and `JWTAuthenticator` resources

#![deny(missing_docs)]

pub mod authenticator_cache;
pub mod engine;
pub mod error;
pub mod informer;
pub mod jwks_observer;

pub use engine::{Controller, ControllerConfig, Key, Syncer};
pub use error::SyncError;
pub use informer::{LabelSelector, ResourceEvent, SharedInformer};
