//! Storage subsystem: where requests are staged and responses awaited.
//!
//! # Data Flow
//! ```text
//! File backend (file.rs):
//!     write_request → {key}.req in the staging directory
//!     consumer pump → {key}.resp
//!     watcher.rs notification → wait_for_response reads {key}.resp
//!
//! Queue backend (queue.rs):
//!     write_request → JSON on the request queue (channel.rs)
//!     external consumer → JSON on the response queue
//!     response listener → resolves the waiter registered for the key
//! ```
//!
//! # Design Decisions
//! - Both backends share one record type and one trait
//! - The backend is chosen once at startup by factory.rs
//! - Writes are idempotent per key; a second writer is a no-op

pub mod artifact;
pub mod channel;
pub mod factory;
pub mod file;
pub mod queue;
pub mod watcher;

use async_trait::async_trait;

use crate::types::{BrokerResponse, BrokerResult, RequestRecord};

pub use factory::{build_storage, StorageHandle};
pub use file::FileStorage;
pub use queue::QueueStorage;

/// Persistence and correlation layer behind the coordinator.
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Stage a request. Writing a key that is already staged succeeds
    /// without touching the existing request.
    async fn write_request(&self, record: &RequestRecord) -> BrokerResult<()>;

    /// Wait until the response for `key` exists or the configured timeout
    /// expires.
    async fn wait_for_response(&self, key: &str) -> BrokerResult<BrokerResponse>;

    /// Release everything held for `key`. Best effort; never fails.
    async fn clean_up(&self, key: &str);
}
