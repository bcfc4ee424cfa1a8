//! Stale-file janitor.
//!
//! Removes staging artifacts nobody came back for: requests whose caller
//! vanished, responses never read and temp files from interrupted writes.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::JanitorConfig;
use crate::observability::metrics;
use crate::storage::artifact::{REQUEST_EXT, RESPONSE_EXT, TEMP_EXT};
use crate::types::BrokerResult;

pub struct CleanupService {
    dir: PathBuf,
    interval: Duration,
    max_age: Duration,
}

impl CleanupService {
    pub fn new(dir: impl Into<PathBuf>, config: &JanitorConfig) -> Self {
        Self {
            dir: dir.into(),
            interval: Duration::from_secs(config.interval_secs),
            max_age: config.file_age_threshold(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            directory = ?self.dir,
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Cleanup service starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(deleted) => tracing::info!(deleted, "Stale files removed"),
                        Err(e) => tracing::error!(error = %e, "Error during cleanup"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cleanup service received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Delete every staging artifact older than the threshold.
    pub async fn sweep(&self) -> BrokerResult<usize> {
        let now = SystemTime::now();
        let mut deleted = 0;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_artifact(&path) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Cannot read file age");
                    continue;
                }
            };
            // mtime in the future counts as fresh
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!(path = ?path, age_secs = age.as_secs(), "Deleted stale file");
                    deleted += 1;
                }
                Err(e) => tracing::error!(path = ?path, error = %e, "Error deleting file"),
            }
        }

        metrics::record_stale_deleted(deleted);
        Ok(deleted)
    }
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == REQUEST_EXT || ext == RESPONSE_EXT || ext == TEMP_EXT)
}
