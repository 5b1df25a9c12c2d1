//! MJPEG frame decoding.
//!
//! # Data Flow
//! ```text
//! upstream body chunks (arbitrary sizes)
//!     → decoder.rs (multipart framing → complete JPEG payloads)
//!     → Frame (one per part, in stream order)
//! ```
//!
//! # Design Decisions
//! - Incremental: chunk boundaries may fall anywhere, including inside headers
//! - `Content-Length` is authoritative when present; otherwise the payload is
//!   cut at the JPEG end-of-image marker
//! - Oversized or malformed parts are reported and skipped, decoding resumes
//!   at the next part

pub mod decoder;

pub use decoder::{DecodeError, Frame, MjpegDecoder};
