//! Deduplicating work queue with per-key exclusion
//!
//! A key is in at most one of three places: waiting in the queue, being
//! processed by a worker, or both marked dirty and being processed (it was
//! added again mid-sync and is requeued when that sync finishes). This is what
//! keeps two workers off the same key and coalesces bursts into one sync.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Work queue shared by a controller's event sources and workers
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Mark `key` as needing a sync
    ///
    /// No-op when the key is already pending or the queue is shut down.
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key, or `None` once the queue is shut down
    ///
    /// The returned key is marked as processing until [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish processing `key`, requeueing it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Count one more consecutive failure for `key` and return the total
    pub fn record_failure(&self, key: &K) -> u32 {
        let mut state = self.state.lock();
        let failures = state.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        *failures
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure count for `key`
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let queue = WorkQueue::new();
        queue.add("ns1");
        queue.add("ns1");
        queue.add("ns2");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some("ns1"));
        assert_eq!(queue.get().await, Some("ns2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_waits_for_done() {
        let queue = WorkQueue::new();
        queue.add("ns1");
        let key = queue.get().await.unwrap();

        queue.add("ns1");
        queue.add("ns1");
        assert!(queue.is_empty(), "key must not be handed out while processing");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("ns1"));
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add("ns1");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_wakes_on_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("ns1");
        assert_eq!(waiter.await.unwrap(), Some("ns1"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiters_and_rejects_adds() {
        let queue: Arc<WorkQueue<&str>> = Arc::new(WorkQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shutdown();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }

        queue.add("ns1");
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delays_the_key() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("ns1", Duration::from_secs(5));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn failures_count_until_forgotten() {
        let queue = WorkQueue::new();
        assert_eq!(queue.record_failure(&"ns1"), 1);
        assert_eq!(queue.record_failure(&"ns1"), 2);
        assert_eq!(queue.failures(&"ns2"), 0);

        queue.forget(&"ns1");
        assert_eq!(queue.failures(&"ns1"), 0);
    }
}
