//! Data hub subsystem.
//!
//! # Data Flow
//! ```text
//! Peer WebSocket message
//!     → server.rs (receive loop)
//!     → message.rs (parse as JSON object, re-serialize)
//!     → peers.rs (enqueue to every other peer)
//!     → each peer's receive loop writes its queue to the socket
//! ```
//!
//! # Design Decisions
//! - One shared broadcast domain, no topics
//! - The sender never receives its own message
//! - Enqueueing never awaits: a slow peer cannot stall a broadcast
//! - Peers with a closed queue are evicted after the broadcast pass

pub mod message;
pub mod peers;
pub mod server;

pub use message::{DataMessage, MessageError};
pub use peers::{BroadcastReport, Membership, PeerSet};
pub use server::DataServer;
