//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, intervals > 0)
//! - Check that addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BrokerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{BrokerConfig, StorageKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("storage.quarantine_directory must differ from storage.directory")]
    QuarantineIsStaging,
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let positive = [
        ("listener.max_body_bytes", config.listener.max_body_bytes as u64),
        ("broker.timeout_secs", config.broker.timeout_secs),
        ("backend.timeout_secs", config.backend.timeout_secs),
        ("consumer.interval_ms", config.consumer.interval_ms),
        ("consumer.max_concurrency", config.consumer.max_concurrency as u64),
        ("janitor.interval_secs", config.janitor.interval_secs),
        ("janitor.file_age_threshold_min", config.janitor.file_age_threshold_min),
        ("storage.poll_fallback_ms", config.storage.poll_fallback_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    if url::Url::parse(&config.backend.base_url).is_err() {
        errors.push(ValidationError::InvalidUrl {
            field: "backend.base_url",
            value: config.backend.base_url.clone(),
        });
    }

    match config.storage.kind {
        StorageKind::File => {
            if config.storage.directory.as_os_str().is_empty() {
                errors.push(ValidationError::Empty { field: "storage.directory" });
            }
            if config.storage.quarantine_directory.as_os_str().is_empty() {
                errors.push(ValidationError::Empty { field: "storage.quarantine_directory" });
            }
            if config.storage.directory == config.storage.quarantine_directory {
                errors.push(ValidationError::QuarantineIsStaging);
            }
        }
        StorageKind::Queue => {
            let queue = &config.storage.queue;
            if url::Url::parse(&queue.amqp_url).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    field: "storage.queue.amqp_url",
                    value: queue.amqp_url.clone(),
                });
            }
            if queue.request_queue.is_empty() {
                errors.push(ValidationError::Empty { field: "storage.queue.request_queue" });
            }
            if queue.response_queue.is_empty() {
                errors.push(ValidationError::Empty { field: "storage.queue.response_queue" });
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
