//! Per-subscriber state for the stream relay.

use crate::net::{ConnectionGuard, ConnectionId, ConnectionState};
use crate::stream::upstream::{UpstreamEvent, UpstreamFetch};

/// One stream subscriber and the upstream fetch it owns.
///
/// The fetch is released when the connection closes, whether through
/// [`ClientConnection::close`] or by dropping the connection.
#[derive(Debug)]
pub struct ClientConnection {
    guard: ConnectionGuard,
    state: ConnectionState,
    upstream: Option<UpstreamFetch>,
}

impl ClientConnection {
    pub fn open(guard: ConnectionGuard, upstream: UpstreamFetch) -> Self {
        Self {
            guard,
            state: ConnectionState::Active,
            upstream: Some(upstream),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    /// Wait for the next upstream event.
    ///
    /// Never resolves once the fetch has been released, so it can sit in a
    /// `select!` next to the client's own receive loop.
    pub async fn next_event(&mut self) -> Option<UpstreamEvent> {
        match self.upstream.as_mut() {
            Some(fetch) => fetch.next().await,
            None => std::future::pending().await,
        }
    }

    /// Drop the fetch after it terminated on its own (failure or end of stream).
    /// The client connection itself stays open.
    pub fn release_upstream(&mut self) {
        if let Some(fetch) = self.upstream.take() {
            fetch.cancel();
        }
    }

    /// Close the connection and cancel its fetch. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        self.release_upstream();
        self.state = ConnectionState::Closed;
        tracing::debug!(connection_id = %self.id(), "Stream client closed");
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}
