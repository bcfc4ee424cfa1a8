//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the broker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the message broker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Request coordination settings (key mode, timeout, cache).
    pub broker: CoordinatorConfig,

    /// Storage backend selection and its settings.
    pub storage: StorageConfig,

    /// Outbound backend the consumer forwards requests to.
    pub backend: BackendConfig,

    /// Consumer pump settings.
    pub consumer: ConsumerConfig,

    /// Stale-file janitor settings.
    pub janitor: JanitorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Derive keys from the body (coalescing) instead of a timestamp.
    pub advanced_mode: bool,

    /// How long a caller waits for a response, in seconds.
    pub timeout_secs: u64,

    /// Lifetime of a cached response, in seconds.
    pub cache_lifetime_secs: u64,

    /// Keep cached responses until they expire even after the last waiter
    /// for the key has left. Off: the cache only serves overlapping callers.
    pub cache_outlives_waiters: bool,
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_lifetime(&self) -> Duration {
        Duration::from_secs(self.cache_lifetime_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            advanced_mode: false,
            timeout_secs: 90,
            cache_lifetime_secs: 30,
            cache_outlives_waiters: false,
        }
    }
}

/// Which storage backend exchanges requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Request/response files in a shared staging directory.
    #[default]
    File,
    /// Request and response queues on an AMQP broker.
    Queue,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Selected backend.
    pub kind: StorageKind,

    /// Staging directory for request/response artifacts.
    pub directory: PathBuf,

    /// Where malformed request artifacts are moved.
    pub quarantine_directory: PathBuf,

    /// Re-check interval for a response file in case a change notification
    /// was lost, in milliseconds.
    pub poll_fallback_ms: u64,

    /// Queue backend settings, used when `kind = "queue"`.
    pub queue: QueueConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            directory: PathBuf::from("/tmp/broker"),
            quarantine_directory: PathBuf::from("/tmp/broker/incorrect"),
            poll_fallback_ms: 1000,
            queue: QueueConfig::default(),
        }
    }
}

/// AMQP queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// AMQP connection URI.
    pub amqp_url: String,

    /// Queue requests are published to.
    pub request_queue: String,

    /// Queue responses are consumed from.
    pub response_queue: String,

    /// Declare both queues as durable.
    pub durable: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            request_queue: "request_queue".to_string(),
            response_queue: "response_queue".to_string(),
            durable: true,
        }
    }
}

/// Outbound backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; the staged request path is appended to it.
    pub base_url: String,

    /// Timeout for a single backend call in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:64172".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Consumer pump configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Run the pump in this process.
    pub enabled: bool,

    /// Delay between cycles in milliseconds.
    pub interval_ms: u64,

    /// Pending requests forwarded concurrently within one cycle.
    pub max_concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 500,
            max_concurrency: 1,
        }
    }
}

/// Stale-file janitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Run the janitor in this process.
    pub enabled: bool,

    /// Delay between sweeps in seconds.
    pub interval_secs: u64,

    /// Files older than this many minutes are deleted.
    pub file_age_threshold_min: u64,
}

impl JanitorConfig {
    pub fn file_age_threshold(&self) -> Duration {
        Duration::from_secs(self.file_age_threshold_min * 60)
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            file_age_threshold_min: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "message_broker=info,tower_http=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
