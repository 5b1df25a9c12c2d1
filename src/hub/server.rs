//! Data hub WebSocket endpoint.
//!
//! # Responsibilities
//! - Accept peer upgrades on any path and add them to the broadcast set
//! - Validate inbound messages and rebroadcast them to every other peer
//! - Write each peer's queue to its socket
//! - Remove peers on disconnect or write failure

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::DataConfig;
use crate::hub::message::{DataMessage, MessageError};
use crate::hub::peers::{BroadcastReport, PeerSet};
use crate::net::{ConnectionId, ConnectionTracker};
use crate::observability::metrics;

/// State injected into the data handler.
#[derive(Clone)]
pub struct DataState {
    pub peers: Arc<PeerSet>,
    pub tracker: ConnectionTracker,
    pub max_message_bytes: usize,
}

/// The data hub endpoint.
pub struct DataServer {
    state: DataState,
}

impl DataServer {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            state: DataState {
                peers: Arc::new(PeerSet::new(config.peer_queue_depth)),
                tracker: ConnectionTracker::new("data"),
                max_message_bytes: config.max_message_bytes,
            },
        }
    }

    pub fn peers(&self) -> Arc<PeerSet> {
        Arc::clone(&self.state.peers)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(data_handler))
            .route("/", any(data_handler))
            .with_state(self.state.clone())
    }

    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        crate::http::serve("data", listener, self.router(), shutdown).await
    }
}

async fn data_handler(
    ws: WebSocketUpgrade,
    State(state): State<DataState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_peer(socket, state, addr))
}

async fn handle_peer(socket: WebSocket, state: DataState, addr: SocketAddr) {
    let guard = state.tracker.track();
    let id = guard.id();
    let mut membership = state.peers.join(id);
    tracing::info!(peer_id = %id, peer_addr = %addr, "Client connected to get data");
    metrics::hub_peers(state.peers.len());

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        relay(&state, id, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        relay(&state, id, &data);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(peer_id = %id, error = %e, "Peer receive error");
                        break;
                    }
                }
            }

            outbound = membership.recv() => {
                let Some(payload) = outbound else { break };
                if let Err(e) = sender.send(Message::Text(payload)).await {
                    tracing::debug!(peer_id = %id, error = %e, "Peer write failed");
                    break;
                }
            }
        }
    }

    drop(membership);
    drop(guard);
    metrics::hub_peers(state.peers.len());
    tracing::info!(peer_id = %id, "Client disconnected from data hub");
}

/// Validate one inbound message and fan it out.
fn relay(state: &DataState, from: ConnectionId, data: &[u8]) -> Option<BroadcastReport> {
    metrics::message_received();

    let message = match parse(data, state.max_message_bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(peer_id = %from, error = %e, "Error parse JSON");
            metrics::parse_error();
            return None;
        }
    };
    tracing::debug!(peer_id = %from, data = %message.to_json(), "Data from peer");

    let payload = Utf8Bytes::from(message.to_json());
    let report = state.peers.broadcast(from, &payload);
    metrics::messages_delivered(report.delivered);
    if report.evicted > 0 {
        metrics::peers_evicted(report.evicted);
        metrics::hub_peers(state.peers.len());
    }
    Some(report)
}

fn parse(data: &[u8], max: usize) -> Result<DataMessage, MessageError> {
    if data.len() > max {
        return Err(MessageError::TooLarge {
            len: data.len(),
            max,
        });
    }
    DataMessage::parse_bytes(data)
}
