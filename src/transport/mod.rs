//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Encoder bytes → framed.rs (length prefix, write_all, flush) → socket
//! socket → framed.rs (read length, bounds check, read_exact) → Decoder
//! ```
//!
//! # Design Decisions
//! - Framing is the only place that suspends on I/O
//! - Frame size is bounded before any allocation
//! - EOF on a frame boundary is a clean close, not an error

pub mod framed;

pub use framed::{FramedTransport, TransportError, DEFAULT_MAX_FRAME_SIZE};
