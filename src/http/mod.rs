//! HTTP entry point.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum, request id, body limit, access log)
//!     → MessageBroker::send_and_wait (method, path + query, body)
//!     → status and body returned verbatim
//! ```

pub mod server;

pub use server::HttpServer;
