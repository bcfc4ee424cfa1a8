//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP server stops accepting and drains
//!             → consumer, janitor and queue listener leave their loops
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every background loop selects on it
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::{drain_tasks, Shutdown};
pub use signals::wait_for_signal;
