//! Baseline binary codec.
//!
//! # Data Flow
//! ```text
//! record (Encode) → Encoder (pending bytes) → transport frame on flush
//! transport frame → Decoder → record (Decode)
//! ```
//!
//! # Design Decisions
//! - Encoding is infallible and synchronous; only the transport suspends
//! - One message per frame, so the decoder always sees whole messages
//! - Unknown fields are skipped, never rejected

pub mod binary;
pub mod record;
pub mod types;

pub use binary::{Decoder, Encoder};
pub use record::{ApplicationException, ApplicationExceptionKind, Decode, Empty, Encode};
pub use types::{FieldHeader, MessageHeader, MessageType, TType};

use thiserror::Error;

/// Faults raised while decoding wire data.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of frame")]
    UnexpectedEnd,

    #[error("unknown field type tag {0}")]
    UnknownType(u8),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("bad protocol version word {0:#010x}")]
    BadVersion(u32),

    #[error("missing version word in strict mode")]
    MissingVersion,

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("nesting too deep")]
    DepthExceeded,

    #[error("{0:?} is not a valid container element type")]
    InvalidElementType(TType),

    #[error("container declares {declared} elements but only {remaining} bytes remain")]
    OversizedContainer { declared: usize, remaining: usize },

    #[error("{record} is missing required field {field}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },
}
