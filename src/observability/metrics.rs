//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_requests_total` (counter): inbound requests by method
//! - `broker_cache_hits_total` (counter): requests answered from the cache
//! - `broker_coalesced_total` (counter): requests that joined in-flight work
//! - `broker_timeouts_total` (counter): requests that gave up waiting
//! - `consumer_forwarded_total` (counter): staged requests sent to the backend, by status
//! - `consumer_quarantined_total` (counter): unparsable request files moved aside
//! - `janitor_deleted_total` (counter): stale staging files removed
//! - `queue_unmatched_total` (counter): queue responses nobody waited for

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str) {
    ::metrics::counter!("broker_requests_total", "method" => method.to_string()).increment(1);
}

pub fn record_cache_hit() {
    ::metrics::counter!("broker_cache_hits_total").increment(1);
}

pub fn record_coalesced() {
    ::metrics::counter!("broker_coalesced_total").increment(1);
}

pub fn record_timeout() {
    ::metrics::counter!("broker_timeouts_total").increment(1);
}

pub fn record_forwarded(status: i32) {
    ::metrics::counter!("consumer_forwarded_total", "status" => status.to_string()).increment(1);
}

pub fn record_quarantined() {
    ::metrics::counter!("consumer_quarantined_total").increment(1);
}

pub fn record_stale_deleted(count: usize) {
    ::metrics::counter!("janitor_deleted_total").increment(count as u64);
}

pub fn record_unmatched_response() {
    ::metrics::counter!("queue_unmatched_total").increment(1);
}
