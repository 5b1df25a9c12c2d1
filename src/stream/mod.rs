//! Stream relay subsystem.
//!
//! # Data Flow
//! ```text
//! Client WebSocket connect
//!     → server.rs (upgrade, per-client loop)
//!     → upstream.rs (one HTTP GET per client, spawned fetch task)
//!     → mjpeg decoder (frame boundaries)
//!     → client.rs (ClientConnection: forward if open, else drop)
//!     → binary WebSocket message
//!
//! Client disconnect:
//!     ClientConnection closed → UpstreamFetch dropped → fetch task aborted
//!     → upstream socket released
//! ```
//!
//! # Design Decisions
//! - No sharing of upstream connections across clients
//! - No frame backlog: at most one decoded frame waits for the client
//! - Upstream failures are reported to the client once; the client stays open

pub mod client;
pub mod server;
pub mod upstream;

pub use client::ClientConnection;
pub use server::StreamServer;
pub use upstream::{UpstreamClient, UpstreamError, UpstreamEvent, UpstreamFetch};
