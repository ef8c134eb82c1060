use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concord_common::backoff::BackoffConfig;
use concord_common::metrics;
use futures::FutureExt;
use kube::{Resource, ResourceExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Key, Syncer, WorkQueue};
use crate::error::SyncError;
use crate::informer::{ResourceEvent, SharedInformer};

/// Default interval between full resyncs
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(180);

/// Tuning for one controller instance
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of concurrent workers (at least one is always started)
    pub workers: usize,
    /// Interval at which every cached key is re-enqueued
    pub resync_period: Duration,
    /// Retry delays for failing keys; `max_attempts` is ignored, keys retry forever
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_period: DEFAULT_RESYNC_PERIOD,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Filter accepting every object
pub fn match_anything<T>(_: &T) -> bool {
    true
}

/// Key an object by its namespace alone
pub fn namespace_key<T: Resource>(obj: &T) -> Option<Key> {
    obj.meta().namespace.as_deref().map(Key::for_namespace)
}

/// Key an object by namespace and name
pub fn object_key<T: Resource>(obj: &T) -> Option<Key> {
    Some(Key::new(obj.meta().namespace.as_deref(), &obj.name_any()))
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type KeyFn<T> = Arc<dyn Fn(&T) -> Option<Key> + Send + Sync>;

/// Type-erased informer registration
#[async_trait]
trait EventSource: Send + Sync {
    async fn wait_for_sync(&self);

    fn cached_keys(&self) -> Vec<Key>;

    fn spawn(
        &self,
        controller: Arc<str>,
        queue: Arc<WorkQueue<Key>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>;
}

struct InformerSource<T> {
    informer: Arc<SharedInformer<T>>,
    filter: Filter<T>,
    key_fn: KeyFn<T>,
}

impl<T> Clone for InformerSource<T> {
    fn clone(&self) -> Self {
        Self {
            informer: self.informer.clone(),
            filter: self.filter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<T> InformerSource<T>
where
    T: Resource + Send + Sync + 'static,
{
    fn key_for(&self, obj: &T) -> Option<Key> {
        if (self.filter)(obj) {
            (self.key_fn)(obj)
        } else {
            None
        }
    }

    fn keys_for_event(&self, event: &ResourceEvent<T>) -> Vec<Key> {
        match event {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => {
                self.key_for(obj).into_iter().collect()
            }
            ResourceEvent::Updated { old, new } => {
                let (old, new) = (old.as_ref(), new.as_ref());
                if !(self.filter)(old) && !(self.filter)(new) {
                    return Vec::new();
                }
                let mut keys: Vec<Key> = [(self.key_fn)(old), (self.key_fn)(new)]
                    .into_iter()
                    .flatten()
                    .collect();
                keys.dedup();
                keys
            }
        }
    }
}

#[async_trait]
impl<T> EventSource for InformerSource<T>
where
    T: Resource + Send + Sync + 'static,
{
    async fn wait_for_sync(&self) {
        self.informer.wait_for_sync().await;
    }

    fn cached_keys(&self) -> Vec<Key> {
        self.informer
            .objects()
            .iter()
            .filter_map(|obj| self.key_for(obj))
            .collect()
    }

    fn spawn(
        &self,
        controller: Arc<str>,
        queue: Arc<WorkQueue<Key>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let source = self.clone();
        // Subscribe before the cache is read so no change falls in between.
        let mut events = self.informer.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = source.informer.wait_for_sync() => {}
            }
            for key in source.cached_keys() {
                queue.add(key);
            }

            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        for key in source.keys_for_event(&event) {
                            queue.add(key);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            controller = %controller,
                            kind = %source.informer.kind(),
                            missed,
                            "Event subscriber lagged, re-enqueueing all cached keys"
                        );
                        for key in source.cached_keys() {
                            queue.add(key);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// A named reconciliation loop over one or more informers
///
/// Built with [`Controller::new`] and [`Controller::watches`], then consumed by
/// [`Controller::run`], which returns once `shutdown` fires and every
/// in-flight sync has finished.
pub struct Controller {
    name: String,
    syncer: Arc<dyn Syncer>,
    config: ControllerConfig,
    sources: Vec<Arc<dyn EventSource>>,
}

impl Controller {
    /// Create a controller with default config and no informers
    pub fn new(name: impl Into<String>, syncer: Arc<dyn Syncer>) -> Self {
        Self {
            name: name.into(),
            syncer,
            config: ControllerConfig::default(),
            sources: Vec::new(),
        }
    }

    /// Replace the config
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enqueue `key_fn(obj)` for every change to an object accepted by `filter`
    ///
    /// For updates the key of both the old and the new object is enqueued when
    /// either passes the filter.
    pub fn watches<T, F, K>(mut self, informer: Arc<SharedInformer<T>>, filter: F, key_fn: K) -> Self
    where
        T: Resource + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
        K: Fn(&T) -> Option<Key> + Send + Sync + 'static,
    {
        self.sources.push(Arc::new(InformerSource {
            informer,
            filter: Arc::new(filter),
            key_fn: Arc::new(key_fn),
        }));
        self
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `shutdown` fires
    ///
    /// Workers start once every informer has completed its initial listing.
    /// On shutdown the queue stops handing out keys and in-flight syncs run
    /// to completion before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        let name: Arc<str> = Arc::from(self.name.as_str());
        let queue = Arc::new(WorkQueue::new());
        let workers = self.config.workers.max(1);

        info!(controller = %name, workers, "Starting controller");

        let mut background: Vec<JoinHandle<()>> = self
            .sources
            .iter()
            .map(|source| source.spawn(name.clone(), queue.clone(), shutdown.clone()))
            .collect();

        let synced = futures::future::join_all(self.sources.iter().map(|s| s.wait_for_sync()));
        tokio::select! {
            _ = shutdown.cancelled() => {
                queue.shutdown();
                info!(controller = %name, "Controller stopped before caches synced");
                return;
            }
            _ = synced => {}
        }
        debug!(controller = %name, "Caches synced");

        let worker_handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|_| {
                tokio::spawn(worker(
                    name.clone(),
                    self.syncer.clone(),
                    queue.clone(),
                    self.config.backoff.clone(),
                ))
            })
            .collect();

        background.push(tokio::spawn(resync(
            self.sources.clone(),
            queue.clone(),
            self.config.resync_period,
        )));

        shutdown.cancelled().await;
        info!(controller = %name, "Stopping controller");

        queue.shutdown();
        for task in background {
            task.abort();
        }
        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!(controller = %name, error = %e, "Worker exited abnormally");
            }
        }

        info!(controller = %name, "Controller stopped");
    }
}

async fn worker(
    controller: Arc<str>,
    syncer: Arc<dyn Syncer>,
    queue: Arc<WorkQueue<Key>>,
    backoff: BackoffConfig,
) {
    while let Some(key) = queue.get().await {
        let result = AssertUnwindSafe(syncer.sync(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SyncError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => {
                queue.forget(&key);
                metrics::record_reconcile(&controller, true);
                debug!(controller = %controller, key = %key, "Synced");
            }
            Err(e) => {
                let failures = queue.record_failure(&key);
                let delay = backoff.delay_for(failures);
                metrics::record_reconcile(&controller, false);
                warn!(
                    controller = %controller,
                    key = %key,
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Sync failed, requeueing"
                );
                queue.add_after(key.clone(), delay);
            }
        }

        queue.done(&key);
    }
}

async fn resync(sources: Vec<Arc<dyn EventSource>>, queue: Arc<WorkQueue<Key>>, period: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if queue.is_shutting_down() {
            return;
        }
        for source in &sources {
            for key in source.cached_keys() {
                queue.add(key);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
