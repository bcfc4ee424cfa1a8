//! Request/response records and error definitions shared by the
//! coordinator and every storage backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A staged request. `key` is the identity; the rest is payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A correlated response produced by the consumer side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub key: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    pub body: String,
}

impl ResponseRecord {
    pub fn into_response(self) -> BrokerResponse {
        BrokerResponse {
            status_code: self.status_code,
            body: self.body,
        }
    }
}

/// What a caller of the broker gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerResponse {
    pub status_code: i32,
    pub body: String,
}

impl BrokerResponse {
    pub fn new(status_code: i32, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }
}

/// Errors that can occur while coordinating a request.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No response appeared before the deadline.
    #[error("Timeout waiting for broker response after {0:?}")]
    Timeout(Duration),

    /// Filesystem failure that survived local retries.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem change notification could not be set up.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Queue transport failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response source went away before answering.
    #[error("Response channel closed for key {0}")]
    Closed(String),
}

impl BrokerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout(_))
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        BrokerError::Queue(e.to_string())
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
