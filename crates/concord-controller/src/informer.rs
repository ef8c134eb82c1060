//! Shared informers: local caches of watched resources
//!
//! A [`SharedInformer`] holds the last observed state of every object of one
//! kind and broadcasts a [`ResourceEvent`] for each change. Controllers read
//! the cache instead of calling the API server, and subscribe to the events to
//! learn which keys to sync.
//!
//! [`run_watcher`] feeds an informer from a kube `watcher` stream. Tests and
//! other sources can drive it directly through [`SharedInformer::apply`],
//! [`SharedInformer::delete`] and [`SharedInformer::replace`].

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Resource, ResourceExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Key;

/// Buffered events per subscriber before it is considered lagging
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Watch timeout, shorter than the client's read timeout so the server ends
/// the watch first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Pause after a watch error before polling the stream again
const WATCH_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A change to one cached object
#[derive(Debug)]
pub enum ResourceEvent<T> {
    /// The object appeared
    Added(Arc<T>),
    /// The object changed
    Updated {
        /// State before the change
        old: Arc<T>,
        /// State after the change
        new: Arc<T>,
    },
    /// The object was removed; carries its last known state
    Deleted(Arc<T>),
}

impl<T> Clone for ResourceEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(obj.clone()),
            Self::Updated { old, new } => Self::Updated {
                old: old.clone(),
                new: new.clone(),
            },
            Self::Deleted(obj) => Self::Deleted(obj.clone()),
        }
    }
}

/// Equality-based label selector; empty matches everything
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `key=value`
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Whether `labels` satisfy every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Local cache of one resource kind plus a change feed
pub struct SharedInformer<T> {
    kind: String,
    cache: RwLock<BTreeMap<Key, Arc<T>>>,
    events: broadcast::Sender<ResourceEvent<T>>,
    synced: watch::Sender<bool>,
}

impl<T> SharedInformer<T>
where
    T: Resource + Send + Sync + 'static,
{
    /// Create an empty, unsynced informer; `kind` is used in logs
    pub fn new(kind: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (synced, _) = watch::channel(false);
        Self {
            kind: kind.into(),
            cache: RwLock::new(BTreeMap::new()),
            events,
            synced,
        }
    }

    /// Kind name used in logs
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Receive every change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent<T>> {
        self.events.subscribe()
    }

    /// Cached objects in `namespace` (all namespaces when `None`) matching `selector`
    pub fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Vec<Arc<T>> {
        self.cache
            .read()
            .iter()
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace.as_deref() == Some(ns)))
            .filter(|(_, obj)| selector.matches(obj.labels()))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Cached object by namespace and name
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<T>> {
        self.cache.read().get(&Key::new(namespace, name)).cloned()
    }

    /// Snapshot of every cached object
    pub fn objects(&self) -> Vec<Arc<T>> {
        self.cache.read().values().cloned().collect()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Record an added or modified object
    pub fn apply(&self, obj: T) {
        let key = object_key(&obj);
        let new = Arc::new(obj);
        let old = self.cache.write().insert(key, new.clone());
        let event = match old {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        };
        self.publish(event);
    }

    /// Record a removed object
    pub fn delete(&self, obj: &T) {
        let key = object_key(obj);
        let removed = self.cache.write().remove(&key);
        if let Some(old) = removed {
            self.publish(ResourceEvent::Deleted(old));
        }
    }

    /// Replace the cache with a complete listing and mark the informer synced
    ///
    /// Objects missing from `objs` are reported as deleted, new ones as added,
    /// and the rest as updated.
    pub fn replace(&self, objs: Vec<T>) {
        let mut seen = HashSet::with_capacity(objs.len());
        let mut events = Vec::with_capacity(objs.len());
        {
            let mut cache = self.cache.write();
            for obj in objs {
                let key = object_key(&obj);
                let new = Arc::new(obj);
                seen.insert(key.clone());
                match cache.insert(key, new.clone()) {
                    Some(old) => events.push(ResourceEvent::Updated { old, new }),
                    None => events.push(ResourceEvent::Added(new)),
                }
            }
            let stale: Vec<Key> = cache.keys().filter(|k| !seen.contains(*k)).cloned().collect();
            for key in stale {
                if let Some(old) = cache.remove(&key) {
                    events.push(ResourceEvent::Deleted(old));
                }
            }
        }
        for event in events {
            self.publish(event);
        }
        self.mark_synced();
    }

    /// Mark the initial listing as complete
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Whether the initial listing has completed
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing has completed
    pub async fn wait_for_sync(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    fn publish(&self, event: ResourceEvent<T>) {
        // No subscribers is fine; the cache is still current.
        let _ = self.events.send(event);
    }
}

fn object_key<T: Resource>(obj: &T) -> Key {
    Key::new(obj.meta().namespace.as_deref(), &obj.name_any())
}

/// Feed `informer` from a kube watch on `api` until `shutdown` fires
///
/// Initial listings (and relists after a watch expires) are buffered and
/// applied through [`SharedInformer::replace`], so objects deleted while the
/// watch was down are reported as deletions.
pub async fn run_watcher<T>(informer: Arc<SharedInformer<T>>, api: Api<T>, shutdown: CancellationToken)
where
    T: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let stream = watcher::watcher(api, config);
    let mut stream = std::pin::pin!(stream);
    let mut relist: Option<Vec<T>> = None;

    info!(kind = %informer.kind(), "Starting informer");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            warn!(kind = %informer.kind(), "Watch stream ended");
            break;
        };

        match event {
            Ok(Event::Init) => {
                debug!(kind = %informer.kind(), "Listing");
                relist = Some(Vec::new());
            }
            Ok(Event::InitApply(obj)) => match relist.as_mut() {
                Some(buffer) => buffer.push(obj),
                None => informer.apply(obj),
            },
            Ok(Event::InitDone) => {
                let objs = relist.take().unwrap_or_default();
                debug!(kind = %informer.kind(), count = objs.len(), "Listing complete");
                informer.replace(objs);
            }
            Ok(Event::Apply(obj)) => informer.apply(obj),
            Ok(Event::Delete(obj)) => informer.delete(&obj),
            Err(e) => {
                warn!(kind = %informer.kind(), error = %e, "Watcher error, will retry");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    info!(kind = %informer.kind(), "Informer stopped");
}
