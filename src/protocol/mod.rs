//! Protocol negotiation and trace header subsystem.
//!
//! # Data Flow
//! ```text
//! Client, first write:
//!     traced.rs → negotiation.rs probe (reserved method, baseline envelope)
//!     → state.rs Unknown → Enhanced | BaselineOnly (once)
//!
//! Client, enhanced:
//!     write: RequestHeader (headers.rs) ++ binary.rs envelope ++ body
//!     read:  ResponseHeader ++ envelope ++ body
//!
//! Server, enhanced (after answering the probe):
//!     read:  RequestHeader ++ envelope ++ body
//!     write: ResponseHeader ++ envelope ++ body
//! ```
//!
//! # Design Decisions
//! - Baseline behavior is byte-for-byte unchanged until the peer opts in
//! - Probe refusal is a fallback, not an error
//! - Probe transport failure fails the connection

pub mod binary;
pub mod headers;
pub mod negotiation;
pub mod state;
pub mod traced;

pub use binary::BinaryProtocol;
pub use headers::{
    ClientId, ConnectionOptions, RequestContext, RequestHeader, ResponseHeader, UpgradeReply,
    UPGRADE_METHOD,
};
pub use negotiation::ProbeOutcome;
pub use state::{ConnectionState, UpgradeState};
pub use traced::{Role, TracedProtocol};

use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::TransportError;

/// Errors from reading or writing protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection failed earlier and can no longer be used")]
    ConnectionFailed,
}

impl ProtocolError {
    /// True if the connection cannot be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Codec(_))
    }
}
