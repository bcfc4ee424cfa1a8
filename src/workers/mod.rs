//! Background workers.
//!
//! # Data Flow
//! ```text
//! consumer.rs: every interval
//!     pending .req files → parse (malformed → quarantine)
//!     → BackendClient::do_request → .resp file
//!
//! janitor.rs: every interval
//!     .tmp/.req/.resp older than the threshold → deleted
//! ```
//!
//! # Design Decisions
//! - Both loops stop on the shutdown broadcast and on nothing else
//! - Errors are logged per item and per cycle, never propagated out of `run`

pub mod consumer;
pub mod janitor;

pub use consumer::{ConsumerService, CycleReport};
pub use janitor::CleanupService;
