//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, queue depths > 0)
//! - Check the upstream URL and both bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let stream_addr = check_bind_address("stream.bind_address", &config.stream.bind_address, &mut errors);
    let data_addr = check_bind_address("data.bind_address", &config.data.bind_address, &mut errors);
    if let (Some(stream), Some(data)) = (stream_addr, data_addr) {
        // Port 0 asks the OS for distinct ephemeral ports.
        if stream == data && stream.port() != 0 {
            errors.push(ValidationError::new(
                "data.bind_address",
                "must differ from stream.bind_address",
            ));
        }
    }

    match url::Url::parse(&config.stream.upstream_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "stream.upstream_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("stream.upstream_url", e.to_string())),
    }

    if config.stream.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("stream.connect_timeout_ms", "must be greater than 0"));
    }
    if config.stream.read_timeout_ms == 0 {
        errors.push(ValidationError::new("stream.read_timeout_ms", "must be greater than 0"));
    }
    if config.stream.max_frame_bytes == 0 {
        errors.push(ValidationError::new("stream.max_frame_bytes", "must be greater than 0"));
    }
    if config.data.peer_queue_depth == 0 {
        errors.push(ValidationError::new("data.peer_queue_depth", "must be greater than 0"));
    }
    if config.data.max_message_bytes == 0 {
        errors.push(ValidationError::new("data.max_message_bytes", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_bind_address(
    field: &'static str,
    value: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<SocketAddr> {
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
            None
        }
    }
}
