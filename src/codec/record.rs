//! Record traits and the standard application exception.

use std::fmt;

use crate::codec::binary::{Decoder, Encoder};
use crate::codec::types::TType;
use crate::codec::CodecError;

/// A value that can be written as a struct body.
pub trait Encode {
    fn encode(&self, encoder: &mut Encoder);
}

/// A value that can be read back from a struct body.
pub trait Decode: Sized {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError>;
}

/// Standard application exception kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationExceptionKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
    Other(i32),
}

impl From<i32> for ApplicationExceptionKind {
    fn from(val: i32) -> Self {
        match val {
            0 => Self::Unknown,
            1 => Self::UnknownMethod,
            2 => Self::InvalidMessageType,
            3 => Self::WrongMethodName,
            4 => Self::BadSequenceId,
            5 => Self::MissingResult,
            6 => Self::InternalError,
            7 => Self::ProtocolError,
            other => Self::Other(other),
        }
    }
}

impl From<ApplicationExceptionKind> for i32 {
    fn from(kind: ApplicationExceptionKind) -> Self {
        match kind {
            ApplicationExceptionKind::Unknown => 0,
            ApplicationExceptionKind::UnknownMethod => 1,
            ApplicationExceptionKind::InvalidMessageType => 2,
            ApplicationExceptionKind::WrongMethodName => 3,
            ApplicationExceptionKind::BadSequenceId => 4,
            ApplicationExceptionKind::MissingResult => 5,
            ApplicationExceptionKind::InternalError => 6,
            ApplicationExceptionKind::ProtocolError => 7,
            ApplicationExceptionKind::Other(code) => code,
        }
    }
}

/// Exception body sent in an `Exception` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    pub message: String,
    pub kind: ApplicationExceptionKind,
}

impl ApplicationException {
    pub fn new(kind: ApplicationExceptionKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn unknown_method(name: &str) -> Self {
        Self::new(
            ApplicationExceptionKind::UnknownMethod,
            format!("Invalid method name: '{}'", name),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApplicationExceptionKind::InternalError, message)
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApplicationException {}

impl Encode for ApplicationException {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            e.field(1, TType::String).write_string(&self.message);
            e.field(2, TType::I32).write_i32(self.kind.into());
        });
    }
}

impl Decode for ApplicationException {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut message = String::new();
        let mut kind = ApplicationExceptionKind::Unknown;
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (1, TType::String) => {
                message = d.read_string()?;
                Ok(())
            }
            (2, TType::I32) => {
                kind = d.read_i32()?.into();
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(Self { message, kind })
    }
}

/// Struct with no fields, used for empty argument and result bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Encode for Empty {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_field_stop();
    }
}

impl Decode for Empty {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        decoder.skip(TType::Struct)?;
        Ok(Empty)
    }
}
