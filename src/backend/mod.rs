//! Outbound calls to the real service behind the broker.
//!
//! The consumer pump is the only caller: it turns a staged request into an
//! HTTP call and the result into a response artifact.

pub mod client;

pub use client::BackendClient;
