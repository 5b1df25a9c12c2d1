//! Camera relay library.
//!
//! Two independent WebSocket endpoints:
//! - the stream relay, which opens one upstream MJPEG fetch per subscriber and
//!   forwards decoded frames as binary messages;
//! - the data hub, which rebroadcasts JSON objects from each peer to every
//!   other peer.

pub mod config;
pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod mjpeg;
pub mod net;
pub mod observability;
pub mod stream;

pub use config::RelayConfig;
pub use hub::DataServer;
pub use lifecycle::Shutdown;
pub use stream::StreamServer;
