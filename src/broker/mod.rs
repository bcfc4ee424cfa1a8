//! Request coordination layer.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → key::derive_key (method, path, body)
//!     → cache hit? return
//!     → per-key lock
//!     → storage.write_request → storage.wait_for_response
//!     → cache insert
//!     → last waiter out: storage.clean_up, state and cache dropped
//! ```
//!
//! # Design Decisions
//! - Identical requests in advanced mode share one key and therefore one
//!   storage round trip; simple mode makes every key unique
//! - The cache normally lives only as long as someone waits on the key.
//!   `broker.cache_outlives_waiters` turns it into a plain TTL cache

pub mod cache;
pub mod coordinator;
pub mod key;

pub use cache::ResponseCache;
pub use coordinator::{BrokerStats, MessageBroker};
pub use key::{derive_key, KeyMode};
