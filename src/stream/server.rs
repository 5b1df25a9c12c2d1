//! Stream relay WebSocket endpoint.
//!
//! # Responsibilities
//! - Accept subscriber upgrades on any path
//! - Start one upstream fetch per subscriber
//! - Forward frames as binary messages while the subscriber is open; frames
//!   decoded while a send is still in flight are replaced by newer ones
//! - Send a single error notice when the fetch fails

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::StreamConfig;
use crate::net::ConnectionTracker;
use crate::observability::metrics;
use crate::stream::client::ClientConnection;
use crate::stream::upstream::{UpstreamClient, UpstreamEvent};

/// State injected into the stream handler.
#[derive(Clone)]
pub struct StreamState {
    pub upstream: UpstreamClient,
    pub clients: ConnectionTracker,
}

/// The stream relay endpoint.
pub struct StreamServer {
    state: StreamState,
}

impl StreamServer {
    pub fn new(config: &StreamConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            state: StreamState {
                upstream: UpstreamClient::new(config)?,
                clients: ConnectionTracker::new("stream"),
            },
        })
    }

    /// Live subscriber count.
    pub fn clients(&self) -> ConnectionTracker {
        self.state.clients.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(stream_handler))
            .route("/", any(stream_handler))
            .with_state(self.state.clone())
    }

    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(upstream = %self.state.upstream.url(), "Stream relay ready");
        crate::http::serve("stream", listener, self.router(), shutdown).await
    }
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<StreamState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_client(socket, state, addr))
}

async fn handle_client(socket: WebSocket, state: StreamState, addr: SocketAddr) {
    let guard = state.clients.track();
    let id = guard.id();
    tracing::info!(connection_id = %id, peer_addr = %addr, "Client connected to get image");
    metrics::stream_clients(state.clients.active_count());

    let fetch = state.upstream.spawn(id);
    let mut conn = ClientConnection::open(guard, fetch);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "Client receive error");
                        break;
                    }
                    // Subscribers have nothing to say.
                    Some(Ok(_)) => {}
                }
            }

            event = conn.next_event() => {
                match event {
                    Some(UpstreamEvent::Frame(frame)) => {
                        let sequence = frame.sequence();
                        if sender.send(Message::Binary(frame.into_bytes())).await.is_err() {
                            tracing::debug!(connection_id = %id, sequence, "Client gone, frame dropped");
                            metrics::frame_dropped("closed");
                            break;
                        }
                        metrics::frame_forwarded();
                    }
                    Some(UpstreamEvent::Failed(err)) => {
                        conn.release_upstream();
                        if sender.send(Message::Text(err.client_notice().into())).await.is_err() {
                            break;
                        }
                    }
                    None => conn.release_upstream(),
                }
            }
        }
    }

    conn.close();
    drop(conn);
    metrics::stream_clients(state.clients.active_count());
    tracing::info!(connection_id = %id, "Client disconnected from image stream");
}
