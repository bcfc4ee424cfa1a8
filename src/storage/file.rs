//! Filesystem storage backend.
//!
//! # Responsibilities
//! - Stage requests as `{key}.req` files, once per key
//! - Wait for `{key}.resp` via change notification, bounded by a deadline
//! - Serve the consumer side: list pending requests, read them, write
//!   responses, quarantine malformed requests
//! - Delete a key's artifacts on clean up
//!
//! # Design Decisions
//! - Content is staged in a `.tmp` file and then published: requests with a
//!   hard link (fails if the key is already staged), responses with a rename,
//!   so readers never see half-written artifacts
//! - Busy files are retried a bounded number of times, never forever

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::{sleep, Instant};

use crate::config::StorageConfig;
use crate::storage::artifact::{self, StagedRequest, REQUEST_EXT, RESPONSE_EXT};
use crate::storage::watcher::ResponseWatcher;
use crate::storage::MessageStorage;
use crate::types::{BrokerError, BrokerResponse, BrokerResult, RequestRecord};

const READ_ATTEMPTS: usize = 10;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);
const DELETE_ATTEMPTS: usize = 3;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Outcome of reading a staged request on the consumer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRead {
    Ready(StagedRequest),
    /// The request file disappeared (answered and cleaned up, or swept).
    Missing,
    /// The request file was malformed and moved to the quarantine directory.
    Quarantined,
}

/// Request/response exchange through a shared staging directory.
pub struct FileStorage {
    dir: PathBuf,
    quarantine_dir: PathBuf,
    timeout: Duration,
    poll_fallback: Duration,
    watcher: ResponseWatcher,
}

impl FileStorage {
    /// Create the staging and quarantine directories and start watching.
    pub fn new(config: &StorageConfig, timeout: Duration) -> BrokerResult<Self> {
        std::fs::create_dir_all(&config.directory)?;
        std::fs::create_dir_all(&config.quarantine_directory)?;

        let watcher = ResponseWatcher::new(&config.directory)?;

        tracing::info!(
            directory = ?config.directory,
            quarantine = ?config.quarantine_directory,
            timeout_secs = timeout.as_secs(),
            "File storage initialized"
        );

        Ok(Self {
            dir: config.directory.clone(),
            quarantine_dir: config.quarantine_directory.clone(),
            timeout,
            poll_fallback: Duration::from_millis(config.poll_fallback_ms),
            watcher,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    /// Number of callers currently waiting on a response file.
    pub fn active_waits(&self) -> usize {
        self.watcher.registered()
    }

    /// Keys that have a request file but no response file yet.
    pub async fn pending_requests(&self) -> BrokerResult<Vec<String>> {
        let mut requests = Vec::new();
        let mut responses = HashSet::new();

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(key) = artifact::key_of(&path, REQUEST_EXT) {
                requests.push(key);
            } else if let Some(key) = artifact::key_of(&path, RESPONSE_EXT) {
                responses.insert(key);
            }
        }

        requests.retain(|key| !responses.contains(key));
        requests.sort();
        Ok(requests)
    }

    /// Read and parse a staged request. Malformed requests are quarantined.
    pub async fn read_request(&self, key: &str) -> BrokerResult<RequestRead> {
        let path = artifact::request_path(&self.dir, key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RequestRead::Missing),
            Err(e) => return Err(e.into()),
        };

        match artifact::parse_request(&String::from_utf8_lossy(&bytes)) {
            Some(staged) => Ok(RequestRead::Ready(staged)),
            None => {
                tracing::warn!(key = %key, "Malformed request file");
                self.quarantine(key).await?;
                Ok(RequestRead::Quarantined)
            }
        }
    }

    /// Publish the response for `key`. Returns false if one already exists
    /// or if the request was cleaned up while the backend was answering.
    pub async fn write_response(&self, key: &str, response: &BrokerResponse) -> BrokerResult<bool> {
        let req_path = artifact::request_path(&self.dir, key);
        let resp_path = artifact::response_path(&self.dir, key);
        if !fs::try_exists(&req_path).await? {
            tracing::info!(key = %key, "Request gone before response, dropping it");
            return Ok(false);
        }
        if fs::try_exists(&resp_path).await? {
            tracing::info!(key = %key, "Response file already exists");
            return Ok(false);
        }

        let tmp_path = artifact::temp_path(&self.dir, key);
        let content = artifact::format_response(response.status_code, &response.body);
        fs::write(&tmp_path, content).await?;
        if let Err(e) = fs::rename(&tmp_path, &resp_path).await {
            remove_quietly(&tmp_path).await;
            return Err(e.into());
        }

        // clean up may have run between the check and the rename
        if !fs::try_exists(&req_path).await? {
            tracing::info!(key = %key, "Request cleaned up during publish, withdrawing response");
            remove_quietly(&resp_path).await;
            return Ok(false);
        }

        tracing::info!(key = %key, status = response.status_code, "Response file written");
        Ok(true)
    }

    /// Move `{key}.req` into the quarantine directory.
    pub async fn quarantine(&self, key: &str) -> BrokerResult<PathBuf> {
        let source = artifact::request_path(&self.dir, key);
        let target = artifact::request_path(&self.quarantine_dir, key);

        if let Err(e) = fs::rename(&source, &target).await {
            // rename cannot cross filesystems; fall back to copy + delete
            tracing::debug!(error = %e, "Rename into quarantine failed, copying");
            fs::copy(&source, &target).await?;
            fs::remove_file(&source).await?;
        }

        tracing::warn!(key = %key, target = ?target, "Moved malformed request to quarantine");
        Ok(target)
    }

    async fn read_response(&self, path: &Path) -> BrokerResult<BrokerResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match fs::read(path).await {
                Ok(bytes) => {
                    let response = artifact::parse_response(&String::from_utf8_lossy(&bytes));
                    tracing::info!(
                        path = ?path,
                        status = response.status_code,
                        length = response.body.len(),
                        "Read response"
                    );
                    return Ok(response);
                }
                Err(e) if attempt < READ_ATTEMPTS => {
                    tracing::debug!(path = ?path, attempt, error = %e, "Response file busy, retrying");
                    sleep(READ_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(path = ?path, error = %e, "Response file not accessible");
                    return Err(e.into());
                }
            }
        }
    }

    async fn delete_with_retry(&self, path: &Path) {
        for attempt in 1..=DELETE_ATTEMPTS {
            match fs::remove_file(path).await {
                Ok(()) => {
                    tracing::debug!(path = ?path, "Deleted file");
                    return;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return,
                Err(e) if attempt < DELETE_ATTEMPTS => {
                    tracing::warn!(path = ?path, error = %e, "File in use, retrying delete");
                    sleep(DELETE_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(path = ?path, error = %e, "Failed to delete file");
                }
            }
        }
    }
}

#[async_trait]
impl MessageStorage for FileStorage {
    async fn write_request(&self, record: &RequestRecord) -> BrokerResult<()> {
        let req_path = artifact::request_path(&self.dir, &record.key);
        if fs::try_exists(&req_path).await? {
            tracing::info!(path = ?req_path, "Request file already exists");
            return Ok(());
        }

        let tmp_path = artifact::temp_path(&self.dir, &record.key);
        let content = artifact::format_request(&record.method, &record.path, &record.body);
        fs::write(&tmp_path, content).await?;

        let published = fs::hard_link(&tmp_path, &req_path).await;
        remove_quietly(&tmp_path).await;

        match published {
            Ok(()) => {
                tracing::info!(path = ?req_path, "Request file written");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::info!(path = ?req_path, "Request file already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_response(&self, key: &str) -> BrokerResult<BrokerResponse> {
        let resp_path = artifact::response_path(&self.dir, key);
        if fs::try_exists(&resp_path).await? {
            tracing::info!(path = ?resp_path, "Response file already exists");
            return self.read_response(&resp_path).await;
        }

        let deadline = Instant::now() + self.timeout;
        let registration = self.watcher.register(format!("{key}.{RESPONSE_EXT}"));
        // first tick fires immediately and re-checks after registering
        let mut recheck = tokio::time::interval(self.poll_fallback);

        loop {
            tokio::select! {
                _ = registration.notified() => {
                    tracing::debug!(path = ?resp_path, "Watcher triggered");
                }
                _ = recheck.tick() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::error!(path = ?resp_path, "Timeout waiting for response file");
                    return Err(BrokerError::Timeout(self.timeout));
                }
            }

            if fs::try_exists(&resp_path).await? {
                return self.read_response(&resp_path).await;
            }
        }
    }

    async fn clean_up(&self, key: &str) {
        self.delete_with_retry(&artifact::request_path(&self.dir, key)).await;
        self.delete_with_retry(&artifact::response_path(&self.dir, key)).await;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::debug!(path = ?path, error = %e, "Could not remove temp file");
    }
}
