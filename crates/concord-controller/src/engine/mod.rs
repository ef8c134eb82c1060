//! Generic controller runtime
//!
//! A [`Controller`] pairs one [`Syncer`] with any number of informers. Each
//! informer notification passes a filter, is mapped to a [`Key`], and lands on
//! a deduplicating [`WorkQueue`]. Workers pull keys and call the syncer; a key
//! is never synced by two workers at once. Failed keys are retried with
//! exponential backoff for as long as the controller runs, and every cached
//! key is re-enqueued on a fixed resync period.

mod controller;
mod queue;

use std::fmt;

use async_trait::async_trait;

pub use controller::{
    match_anything, namespace_key, object_key, Controller, ControllerConfig, DEFAULT_RESYNC_PERIOD,
};
pub use queue::WorkQueue;

use crate::error::SyncError;

/// Identifies one reconcilable unit
///
/// Namespace-wide controllers use a key with an empty name; cluster-scoped
/// resources have no namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Namespace, if any
    pub namespace: Option<String>,
    /// Object name, empty for namespace-wide keys
    pub name: String,
}

impl Key {
    /// Create a key
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(String::from),
            name: name.to_string(),
        }
    }

    /// Key covering a whole namespace
    pub fn for_namespace(namespace: &str) -> Self {
        Self::new(Some(namespace), "")
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: &str) -> Self {
        Self::new(None, name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.namespace, self.name.is_empty()) {
            (Some(ns), true) => f.write_str(ns),
            (Some(ns), false) => write!(f, "{ns}/{}", self.name),
            (None, _) => f.write_str(&self.name),
        }
    }
}

/// Recomputes derived state for one key
///
/// Called with at most one invocation per key at a time. Returning an error
/// schedules a retry with backoff; returning `Ok` resets the backoff.
#[async_trait]
pub trait Syncer: Send + Sync + 'static {
    /// Reconcile `key` against current cached state
    async fn sync(&self, key: &Key) -> Result<(), SyncError>;
}
