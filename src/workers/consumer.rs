//! Consumer pump for the filesystem backend.
//!
//! Plays the provider side of the exchange: it picks up request files the
//! broker staged, calls the backend and writes the matching response files.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::backend::BackendClient;
use crate::config::ConsumerConfig;
use crate::observability::metrics;
use crate::storage::file::RequestRead;
use crate::storage::FileStorage;
use crate::types::BrokerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Forwarded,
    Quarantined,
    Skipped,
    Failed,
}

/// Tally of one pump cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub forwarded: usize,
    pub quarantined: usize,
    /// Requests that vanished or were answered by someone else meanwhile.
    pub skipped: usize,
    pub failed: usize,
}

impl CycleReport {
    fn tally(outcomes: &[ItemOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut report, outcome| {
            match outcome {
                ItemOutcome::Forwarded => report.forwarded += 1,
                ItemOutcome::Quarantined => report.quarantined += 1,
                ItemOutcome::Skipped => report.skipped += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
            report
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ConsumerService {
    storage: Arc<FileStorage>,
    client: BackendClient,
    interval: Duration,
    max_concurrency: usize,
}

impl ConsumerService {
    pub fn new(storage: Arc<FileStorage>, client: BackendClient, config: &ConsumerConfig) -> Self {
        Self {
            storage,
            client,
            interval: Duration::from_millis(config.interval_ms),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            max_concurrency = self.max_concurrency,
            directory = ?self.storage.staging_dir(),
            "Consumer service starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(?report, "Consumer cycle finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Error in consumer loop"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Consumer service received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Forward every currently pending request once.
    pub async fn run_cycle(&self) -> BrokerResult<CycleReport> {
        let pending = self.storage.pending_requests().await?;
        if pending.is_empty() {
            return Ok(CycleReport::default());
        }
        tracing::debug!(count = pending.len(), "Pending requests found");

        let outcomes: Vec<ItemOutcome> = stream::iter(pending)
            .map(|key| async move { self.process(&key).await })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        Ok(CycleReport::tally(&outcomes))
    }

    async fn process(&self, key: &str) -> ItemOutcome {
        let staged = match self.storage.read_request(key).await {
            Ok(RequestRead::Ready(staged)) => staged,
            Ok(RequestRead::Missing) => return ItemOutcome::Skipped,
            Ok(RequestRead::Quarantined) => {
                metrics::record_quarantined();
                return ItemOutcome::Quarantined;
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error reading request file");
                return ItemOutcome::Failed;
            }
        };

        tracing::info!(key = %key, method = %staged.method, path = %staged.path, "Processing request");
        let url = self.client.url_for(&staged.path);
        let response = self.client.do_request(&url, &staged.method, &staged.body).await;
        metrics::record_forwarded(response.status_code);

        match self.storage.write_response(key, &response).await {
            Ok(true) => ItemOutcome::Forwarded,
            Ok(false) => ItemOutcome::Skipped,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error writing response file");
                ItemOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, StorageConfig};
    use crate::storage::MessageStorage;
    use crate::types::{BrokerResponse, RequestRecord};
    use axum::{body::Bytes, routing::any, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_backend(calls: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/{*path}",
            any(move |body: Bytes| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::CREATED, format!("got:{}", String::from_utf8_lossy(&body)))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn setup(dir: &std::path::Path, base_url: &str, max_concurrency: usize) -> (Arc<FileStorage>, ConsumerService) {
        let storage = Arc::new(
            FileStorage::new(
                &StorageConfig {
                    directory: dir.join("staging"),
                    quarantine_directory: dir.join("incorrect"),
                    ..StorageConfig::default()
                },
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let client = BackendClient::new(&BackendConfig {
            base_url: base_url.to_string(),
            timeout_secs: 2,
        })
        .unwrap();
        let config = ConsumerConfig {
            interval_ms: 20,
            max_concurrency,
            ..ConsumerConfig::default()
        };
        (storage.clone(), ConsumerService::new(storage, client, &config))
    }

    fn record(key: &str, body: &str) -> RequestRecord {
        RequestRecord {
            key: key.to_string(),
            method: "POST".to_string(),
            path: "/orders".to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_forwards_pending_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_backend(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (storage, consumer) = setup(dir.path(), &base, 4);

        storage.write_request(&record("a", "1")).await.unwrap();
        storage.write_request(&record("b", "2")).await.unwrap();

        let report = consumer.run_cycle().await.unwrap();
        assert_eq!(report.forwarded, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(storage.wait_for_response("a").await.unwrap(), BrokerResponse::new(201, "got:1"));

        // answered requests are not forwarded again
        assert!(consumer.run_cycle().await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_request_never_reaches_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_backend(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (storage, consumer) = setup(dir.path(), &base, 1);

        std::fs::write(storage.staging_dir().join("bad.req"), "POST\n").unwrap();

        let report = consumer.run_cycle().await.unwrap();
        assert_eq!(report.quarantined, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(storage.quarantine_dir().join("bad.req").exists());
        assert!(!storage.staging_dir().join("bad.resp").exists());
    }

    #[tokio::test]
    async fn test_unreachable_backend_still_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let (storage, consumer) = setup(dir.path(), &format!("http://{addr}"), 1);
        storage.write_request(&record("down", "")).await.unwrap();

        consumer.run_cycle().await.unwrap();
        assert_eq!(storage.wait_for_response("down").await.unwrap().status_code, 500);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_backend(calls.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (storage, consumer) = setup(dir.path(), &base, 1);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(consumer.run(rx));

        storage.write_request(&record("loop", "x")).await.unwrap();
        let response = storage.wait_for_response("loop").await.unwrap();
        assert_eq!(response.body, "got:x");

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
