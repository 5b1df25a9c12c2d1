//! TCP listener binding.

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured address is not a socket address.
    #[error("Invalid bind address '{address}': {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
}

/// Bind a TCP listener for one of the relay endpoints.
///
/// `endpoint` only labels the log line ("stream" or "data").
pub async fn bind(endpoint: &'static str, address: &str) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = address.parse().map_err(|source| ListenerError::Address {
        address: address.to_string(),
        source,
    })?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { address: addr, source })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenerError::Bind { address: addr, source })?;

    tracing::info!(
        endpoint,
        address = %local_addr,
        "Listener bound"
    );

    Ok(listener)
}
