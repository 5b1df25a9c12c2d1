//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, report local address)
//!     → axum WebSocket upgrade
//!     → connection.rs (ids, lifecycle state, active counts)
//!     → stream relay or data hub handler
//!
//! Connection States:
//!     Active → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Binding failures are fatal at startup
//! - Each connection tracked through an RAII guard

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{bind, ListenerError};
