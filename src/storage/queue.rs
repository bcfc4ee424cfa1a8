//! Queue storage backend.
//!
//! # Responsibilities
//! - Publish requests as JSON on the request queue, once per key
//! - Correlate JSON responses from the response queue back to waiters
//! - Drop responses nobody asked for
//!
//! # Design Decisions
//! - A response is kept until the coordinator cleans the key up, so callers
//!   that queued behind the first waiter read it instead of publishing again
//! - Waiters that time out are removed from the correlation map

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::observability::metrics;
use crate::storage::channel::QueueChannel;
use crate::storage::MessageStorage;
use crate::types::{BrokerError, BrokerResponse, BrokerResult, RequestRecord, ResponseRecord};

/// What happened to one message from the response queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Handed to a waiting caller.
    Delivered,
    /// Kept for a caller that has not started waiting yet.
    Stored,
    /// No caller ever asked for this key.
    Unmatched,
    /// Payload was not a response record.
    Invalid,
}

/// Request/response exchange over a pair of queues.
pub struct QueueStorage {
    channel: Arc<dyn QueueChannel>,
    request_queue: String,
    response_queue: String,
    timeout: Duration,
    published: DashSet<String>,
    answered: DashMap<String, BrokerResponse>,
    waiters: DashMap<String, oneshot::Sender<BrokerResponse>>,
}

impl QueueStorage {
    pub fn new(channel: Arc<dyn QueueChannel>, config: &QueueConfig, timeout: Duration) -> Self {
        Self {
            channel,
            request_queue: config.request_queue.clone(),
            response_queue: config.response_queue.clone(),
            timeout,
            published: DashSet::new(),
            answered: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Subscribe to the response queue and drain it on a background task
    /// until shutdown or until the queue stream ends.
    pub async fn start_listener(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> BrokerResult<JoinHandle<()>> {
        let mut messages = self.channel.consume(&self.response_queue).await?;
        let storage = self.clone();

        tracing::info!(queue = %self.response_queue, "Response listener starting");
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = messages.next() => match message {
                        Some(payload) => {
                            storage.handle_response(&payload);
                        }
                        None => {
                            tracing::warn!("Response queue stream ended");
                            break;
                        }
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("Response listener received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }))
    }

    /// Correlate one response message with its waiter.
    pub fn handle_response(&self, payload: &[u8]) -> ResponseOutcome {
        let record: ResponseRecord = match serde_json::from_slice(payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Failed to deserialize response message"
                );
                return ResponseOutcome::Invalid;
            }
        };

        let key = record.key.clone();
        if !self.published.contains(&key) && !self.waiters.contains_key(&key) {
            tracing::warn!(key = %key, "Response with unknown key received");
            metrics::record_unmatched_response();
            return ResponseOutcome::Unmatched;
        }

        let response = record.into_response();
        self.answered.insert(key.clone(), response.clone());
        let delivered = match self.waiters.remove(&key) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        };
        if delivered {
            tracing::debug!(key = %key, "Response delivered");
            ResponseOutcome::Delivered
        } else {
            ResponseOutcome::Stored
        }
    }

    /// Callers currently parked on a response.
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}

#[async_trait]
impl MessageStorage for QueueStorage {
    async fn write_request(&self, record: &RequestRecord) -> BrokerResult<()> {
        if !self.published.insert(record.key.clone()) {
            tracing::info!(key = %record.key, "Request already published");
            return Ok(());
        }

        let payload = serde_json::to_vec(record)?;
        if let Err(e) = self.channel.publish(&self.request_queue, payload).await {
            self.published.remove(&record.key);
            return Err(e);
        }

        tracing::info!(key = %record.key, queue = %self.request_queue, "Request published");
        Ok(())
    }

    async fn wait_for_response(&self, key: &str) -> BrokerResult<BrokerResponse> {
        if let Some(response) = self.answered.get(key) {
            return Ok(response.clone());
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(key.to_string(), tx);

        // the listener may have answered between the check and the insert
        if let Some(response) = self.answered.get(key).map(|r| r.clone()) {
            self.waiters.remove(key);
            return Ok(response);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BrokerError::Closed(key.to_string())),
            Err(_) => {
                self.waiters.remove(key);
                tracing::error!(key = %key, "Timeout waiting for queue response");
                Err(BrokerError::Timeout(self.timeout))
            }
        }
    }

    async fn clean_up(&self, key: &str) {
        self.waiters.remove(key);
        self.answered.remove(key);
        self.published.remove(key);
    }
}
