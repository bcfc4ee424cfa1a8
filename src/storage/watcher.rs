//! Change notification for response files in the staging directory.
//!
//! One `notify` watcher covers the whole directory. Waiters register the
//! exact file name they care about and get woken through a `Notify` when an
//! event touches that name. Dropping the returned guard deregisters.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::types::BrokerResult;

/// Waiters per watched file name, so an event only touches its own waiters.
type Registrations = Arc<DashMap<OsString, Vec<(u64, Arc<Notify>)>>>;

/// Routes filesystem events for one directory to registered waiters.
pub struct ResponseWatcher {
    dir: PathBuf,
    registrations: Registrations,
    next_id: AtomicU64,
    _watcher: Mutex<RecommendedWatcher>,
}

impl ResponseWatcher {
    /// Start watching `dir` (non-recursive).
    pub fn new(dir: &Path) -> BrokerResult<Self> {
        let registrations: Registrations = Arc::new(DashMap::new());
        let routes = registrations.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_create() || event.kind.is_modify()) {
                        return;
                    }
                    for name in event.paths.iter().filter_map(|p| p.file_name()) {
                        dispatch(&routes, name);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Staging directory watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::debug!(path = ?dir, "Response watcher started");
        Ok(Self {
            dir: dir.to_path_buf(),
            registrations,
            next_id: AtomicU64::new(0),
            _watcher: Mutex::new(watcher),
        })
    }

    /// Register interest in `file_name` inside the watched directory.
    pub fn register(&self, file_name: impl Into<OsString>) -> WatchGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let file_name = file_name.into();
        let notify = Arc::new(Notify::new());
        self.registrations
            .entry(file_name.clone())
            .or_default()
            .push((id, notify.clone()));

        WatchGuard {
            id,
            file_name,
            notify,
            registrations: self.registrations.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Live registrations; zero once every waiter has finished.
    pub fn registered(&self) -> usize {
        self.registrations.iter().map(|entry| entry.value().len()).sum()
    }

    /// Distinct file names currently watched for.
    pub fn watched_names(&self) -> usize {
        self.registrations.len()
    }
}

fn dispatch(routes: &Registrations, name: &OsStr) {
    if let Some(waiters) = routes.get(name) {
        for (_, notify) in waiters.iter() {
            // notify_one keeps a permit when nobody is parked yet
            notify.notify_one();
        }
    }
}

/// A live registration. Deregisters on drop.
pub struct WatchGuard {
    id: u64,
    file_name: OsString,
    notify: Arc<Notify>,
    registrations: Registrations,
}

impl WatchGuard {
    /// Resolve on the next event for the registered file.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.registrations.entry(self.file_name.clone()) {
            entry.get_mut().retain(|(id, _)| *id != self.id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}
