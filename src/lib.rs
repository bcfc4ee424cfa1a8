//! Decoupling message broker.
//!
//! Accepts arbitrary HTTP requests, stages them in a storage medium that a
//! separate consumer drains, and answers each caller with the response the
//! consumer produced. Identical requests can be coalesced into one unit of
//! backend work.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http::server ──▶ broker::coordinator ──▶ storage (file | queue)
//!                                   │   key + cache          │
//!                                   ▼                        ▼
//!                              per-key lock           workers::consumer ──▶ backend
//!                                                     workers::janitor
//! ```

pub mod backend;
pub mod broker;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod storage;
pub mod types;
pub mod workers;

pub use broker::MessageBroker;
pub use config::schema::BrokerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use types::{BrokerError, BrokerResponse, BrokerResult};
