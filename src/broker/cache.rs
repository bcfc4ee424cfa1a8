//! Short-lived response cache keyed by request key.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::BrokerResponse;

/// A cached response and when it stops being valid.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: BrokerResponse,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Check if the entry is still valid.
    pub fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// A thread-safe cache of completed responses.
#[derive(Clone, Default)]
pub struct ResponseCache {
    inner: Arc<DashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live entry. Expired entries are evicted on the way.
    pub fn get(&self, key: &str) -> Option<BrokerResponse> {
        if let Some(entry) = self.inner.get(key) {
            if entry.is_live() {
                return Some(entry.value.clone());
            }
        }
        self.inner.remove_if(key, |_, entry| !entry.is_live());
        None
    }

    pub fn insert(&self, key: &str, value: BrokerResponse, ttl: Duration) {
        self.inner.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.is_live());
        before.saturating_sub(self.inner.len())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
