//! Request coordination.
//!
//! # Responsibilities
//! - Derive the key for each inbound request
//! - Serve live cached responses without touching storage
//! - Serialize storage round trips per key so concurrent identical requests
//!   share one unit of work
//! - Clean up storage, state and cache when the last waiter for a key leaves
//!
//! # Invariants
//! - At most one task holds the lock for a key
//! - `waiters` counts callers registered for a key and not yet departed;
//!   a waiter departs only while holding the key lock
//! - The last waiter cleans storage up under the key lock and only then
//!   removes the state, and only if nobody joined it meanwhile. A caller
//!   arriving during clean up queues on the same lock
//! - Departure runs on every exit path, including a dropped caller future

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

use crate::broker::cache::ResponseCache;
use crate::broker::key::{derive_key, KeyMode};
use crate::config::CoordinatorConfig;
use crate::observability::metrics;
use crate::storage::MessageStorage;
use crate::types::{BrokerResponse, BrokerResult, RequestRecord};

/// Per-key coordination state.
struct RequestState {
    lock: Arc<Mutex<()>>,
    waiters: AtomicUsize,
}

impl RequestState {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            waiters: AtomicUsize::new(0),
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot of coordinator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub requests: u64,
    pub cache_hits: u64,
    /// Callers that joined a key another caller was already working on.
    pub coalesced: u64,
    pub timeouts: u64,
    pub in_flight_keys: usize,
}

/// Per-key states and what a departing waiter needs to settle its key.
/// Cloned into a spawned task when a caller is abandoned.
#[derive(Clone)]
struct KeyTable {
    requests: Arc<DashMap<String, Arc<RequestState>>>,
    cache: ResponseCache,
    storage: Arc<dyn MessageStorage>,
    cache_outlives_waiters: bool,
}

impl KeyTable {
    /// Deregister one waiter. Returns true when it was the last one.
    fn release(&self, key: &str, state: &RequestState) -> bool {
        let remaining = state.waiters.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::debug!(key = %key, remaining, "Waiter departed");
        if remaining == 0 && !self.cache_outlives_waiters {
            self.cache.remove(key);
        }
        remaining == 0
    }

    /// Drop the state for `key` unless a caller joined it in the meantime.
    fn retire(&self, key: &str, state: &Arc<RequestState>) {
        let removed = self
            .requests
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, state) && current.waiters.load(Ordering::Acquire) == 0
            })
            .is_some();
        if !removed {
            tracing::debug!(key = %key, "Key rejoined during clean up, state kept");
        }
    }

    /// Settle one departing waiter. Must run under the key lock, so a caller
    /// joining during clean up queues behind it on the same state.
    async fn settle(&self, key: &str, state: &Arc<RequestState>) {
        if !self.release(key, state) {
            return;
        }
        self.storage.clean_up(key).await;
        tracing::debug!(key = %key, "Cleaned up");
        self.retire(key, state);
    }
}

/// Deduplicates, serializes and caches requests in front of a storage backend.
pub struct MessageBroker {
    table: KeyTable,
    mode: KeyMode,
    cache_lifetime: Duration,
    counters: Counters,
}

impl MessageBroker {
    pub fn new(config: &CoordinatorConfig, storage: Arc<dyn MessageStorage>) -> Self {
        Self {
            table: KeyTable {
                requests: Arc::new(DashMap::new()),
                cache: ResponseCache::new(),
                storage,
                cache_outlives_waiters: config.cache_outlives_waiters,
            },
            mode: KeyMode::from_advanced(config.advanced_mode),
            cache_lifetime: config.cache_lifetime(),
            counters: Counters::default(),
        }
    }

    /// Stage the request and wait for its response, sharing the work with
    /// any concurrent caller that derives the same key.
    pub async fn send_and_wait(&self, method: &str, path: &str, body: &str) -> BrokerResult<BrokerResponse> {
        let key = derive_key(self.mode, method, path, body);
        tracing::info!(key = %key, method = %method, path = %path, "Generated key");
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        metrics::record_request(method);

        if let Some(cached) = self.table.cache.get(&key) {
            tracing::info!(key = %key, "Cache hit");
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_hit();
            return Ok(cached);
        }

        let state = self.join(&key);
        let mut departure = Departure {
            table: &self.table,
            key: &key,
            state: state.clone(),
            lock: None,
            done: false,
        };

        departure.lock = Some(state.lock.clone().lock_owned().await);
        tracing::debug!(key = %key, "Lock acquired");

        let record = RequestRecord {
            key: key.clone(),
            method: method.to_string(),
            path: path.to_string(),
            body: body.to_string(),
        };
        let result = self.exchange(&record).await;

        match &result {
            Ok(response) => {
                self.table.cache.insert(&key, response.clone(), self.cache_lifetime);
            }
            Err(e) if e.is_timeout() => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_timeout();
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Request failed");
            }
        }

        departure.complete().await;
        result
    }

    async fn exchange(&self, record: &RequestRecord) -> BrokerResult<BrokerResponse> {
        if let Err(e) = self.table.storage.write_request(record).await {
            // the wait below will time out unless the request shows up anyway
            tracing::warn!(key = %record.key, error = %e, "Failed to persist request");
        }
        self.table.storage.wait_for_response(&record.key).await
    }

    /// Register a waiter for `key`, creating its state on first arrival.
    fn join(&self, key: &str) -> Arc<RequestState> {
        let state = self
            .table
            .requests
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RequestState::new()));
        let waiters = state.waiters.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(key = %key, waiters, "Waiter registered");

        if waiters > 1 {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::record_coalesced();
        }
        state.clone()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            in_flight_keys: self.table.requests.len(),
        }
    }

    /// Drop expired cache entries. Only needed when the cache outlives waiters.
    pub fn purge_cache(&self) -> usize {
        self.table.cache.purge_expired()
    }

    pub fn key_mode(&self) -> KeyMode {
        self.mode
    }

    /// Periodically purge expired cache entries until shutdown.
    pub async fn run_cache_purge(self: Arc<Self>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.purge_cache();
                    if purged > 0 {
                        tracing::debug!(purged, "Expired cache entries purged");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache purge received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Settles one waiter exactly once: inline through `complete`, or from
/// `Drop` when the caller's future is abandoned mid-flight. Settling always
/// happens under the key lock, which stays reachable from the map until
/// storage clean up has finished.
struct Departure<'a> {
    table: &'a KeyTable,
    key: &'a str,
    state: Arc<RequestState>,
    lock: Option<OwnedMutexGuard<()>>,
    done: bool,
}

impl Departure<'_> {
    async fn complete(mut self) {
        self.done = true;
        let lock = match self.lock.take() {
            Some(lock) => lock,
            None => self.state.lock.clone().lock_owned().await,
        };
        self.table.settle(self.key, &self.state).await;
        drop(lock);
        tracing::debug!(key = %self.key, "Lock released");
    }
}

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        tracing::info!(key = %self.key, "Caller abandoned request, settling in background");
        let table = self.table.clone();
        let key = self.key.to_string();
        let state = self.state.clone();
        let lock = self.lock.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _lock = match lock {
                        Some(lock) => lock,
                        None => state.lock.clone().lock_owned().await,
                    };
                    table.settle(&key, &state).await;
                });
            }
            Err(_) => {
                tracing::warn!(key = %key, "No runtime to clean up on; leaving files to the janitor");
                if table.release(&key, &state) {
                    table.retire(&key, &state);
                }
            }
        }
    }
}
