//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! broker, storage, workers, http:
//!     → tracing events (logging.rs installs the subscriber)
//!     → counters (metrics.rs, scraped through the Prometheus exporter)
//! ```
//!
//! # Design Decisions
//! - Every log line carries the request key when one exists
//! - Counter updates are no-ops until the exporter is installed

pub mod logging;
pub mod metrics;
