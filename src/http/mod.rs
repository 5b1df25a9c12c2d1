//! HTTP serving shared by both endpoints.
//!
//! # Data Flow
//! ```text
//! TcpListener
//!     → server.rs (axum::serve, trace layer, graceful shutdown)
//!     → endpoint router (stream relay or data hub)
//!     → WebSocket upgrade
//! ```

pub mod server;

pub use server::serve;
