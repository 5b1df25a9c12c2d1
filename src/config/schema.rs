//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the camera relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Stream relay endpoint and upstream camera settings.
    pub stream: StreamConfig,

    /// Data hub endpoint settings.
    pub data: DataConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Stream relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bind address for the stream endpoint (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// MJPEG source URL fetched once per subscribing client.
    pub upstream_url: String,

    /// Upstream connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Upstream idle read timeout in milliseconds.
    pub read_timeout_ms: u64,

    /// Largest frame the decoder accepts, in bytes.
    pub max_frame_bytes: usize,
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            upstream_url: "http://192.168.137.215/mjpeg/1".to_string(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            max_frame_bytes: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Data hub configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// Bind address for the data endpoint (e.g., "0.0.0.0:3001").
    pub bind_address: String,

    /// Outbound messages queued per peer before new ones are dropped for it.
    pub peer_queue_depth: usize,

    /// Maximum inbound message size in bytes.
    pub max_message_bytes: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            peer_queue_depth: 64,
            max_message_bytes: 64 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
