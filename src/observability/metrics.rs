//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_stream_clients` (gauge): connected stream subscribers
//! - `relay_frames_forwarded_total` (counter)
//! - `relay_frames_dropped_total` (counter): by reason (closed, decode)
//! - `relay_upstream_errors_total` (counter): by kind (connect, status, read)
//! - `hub_peers` (gauge): connected data peers
//! - `hub_messages_received_total` (counter)
//! - `hub_messages_delivered_total` (counter): per recipient
//! - `hub_parse_errors_total` (counter)
//! - `hub_peers_evicted_total` (counter): peers removed after a failed write

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn stream_clients(count: u64) {
    metrics::gauge!("relay_stream_clients").set(count as f64);
}

pub fn frame_forwarded() {
    metrics::counter!("relay_frames_forwarded_total").increment(1);
}

pub fn frame_dropped(reason: &'static str) {
    metrics::counter!("relay_frames_dropped_total", "reason" => reason).increment(1);
}

pub fn upstream_error(kind: &'static str) {
    metrics::counter!("relay_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn hub_peers(count: usize) {
    metrics::gauge!("hub_peers").set(count as f64);
}

pub fn message_received() {
    metrics::counter!("hub_messages_received_total").increment(1);
}

pub fn messages_delivered(count: usize) {
    metrics::counter!("hub_messages_delivered_total").increment(count as u64);
}

pub fn parse_error() {
    metrics::counter!("hub_parse_errors_total").increment(1);
}

pub fn peers_evicted(count: usize) {
    metrics::counter!("hub_peers_evicted_total").increment(count as u64);
}
