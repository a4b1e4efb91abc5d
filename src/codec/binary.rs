//! Strict binary encoding.
//!
//! # Layout
//! ```text
//! message begin: i32 (VERSION_1 | type) | string name | i32 seq_id
//! field header:  u8 type | i16 id          (struct ends with a single 0 byte)
//! list header:   u8 element type | i32 size
//! string/binary: i32 length | bytes
//! ```
//!
//! All integers are big-endian. The encoder writes into an owned buffer that
//! the transport drains on flush; the decoder reads one complete frame.

use crate::codec::types::{FieldHeader, MessageHeader, MessageType, TType};
use crate::codec::CodecError;

/// Strict-mode version marker in the high 16 bits of the first word.
pub const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const MAX_SKIP_DEPTH: usize = 64;

/// Serializes values into a pending outbound buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Drain the pending bytes, leaving the encoder empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Drop anything written since the last flush.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn write_message_begin(&mut self, header: &MessageHeader) {
        let version = VERSION_1 | header.kind as u32;
        self.write_i32(version as i32);
        self.write_string(&header.name);
        self.write_i32(header.seq_id);
    }

    pub fn write_bool(&mut self, val: bool) {
        self.buf.push(u8::from(val));
    }

    pub fn write_byte(&mut self, val: i8) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_i16(&mut self, val: i16) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_i64(&mut self, val: i64) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_double(&mut self, val: f64) {
        self.buf.extend_from_slice(&val.to_bits().to_be_bytes());
    }

    pub fn write_binary(&mut self, val: &[u8]) {
        self.write_i32(val.len() as i32);
        self.buf.extend_from_slice(val);
    }

    pub fn write_string(&mut self, val: &str) {
        self.write_binary(val.as_bytes());
    }

    pub fn write_field_begin(&mut self, ttype: TType, id: i16) {
        self.buf.push(ttype as u8);
        self.write_i16(id);
    }

    pub fn write_field_stop(&mut self) {
        self.buf.push(TType::Stop as u8);
    }

    pub fn write_list_begin(&mut self, element: TType, len: usize) {
        self.buf.push(element as u8);
        self.write_i32(len as i32);
    }

    /// Write a field header and hand back the encoder for the value.
    pub fn field(&mut self, id: i16, ttype: TType) -> &mut Self {
        self.write_field_begin(ttype, id);
        self
    }

    /// Write a struct body produced by `fields`, terminated by a stop byte.
    pub fn write_struct<F>(&mut self, fields: F)
    where
        F: FnOnce(&mut Self),
    {
        fields(self);
        self.write_field_stop();
    }
}

/// Reads values out of one received frame.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
    pos: usize,
}

impl Decoder {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Discard the unread remainder of the frame. Returns how many bytes were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.remaining();
        self.buf.clear();
        self.pos = 0;
        dropped
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self
            .pos
            .checked_add(N)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::UnexpectedEnd)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn read_message_begin(&mut self, strict: bool) -> Result<MessageHeader, CodecError> {
        let first = self.read_i32()?;
        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(CodecError::BadVersion(word));
            }
            let kind = MessageType::try_from((word & 0xff) as u8)?;
            let name = self.read_string()?;
            let seq_id = self.read_i32()?;
            return Ok(MessageHeader { name, kind, seq_id });
        }
        if strict {
            return Err(CodecError::MissingVersion);
        }
        // Old-style envelope: the first word is the name length.
        let name = String::from_utf8(self.read_raw(first as usize)?)?;
        let kind = MessageType::try_from(self.read_byte()? as u8)?;
        let seq_id = self.read_i32()?;
        Ok(MessageHeader { name, kind, seq_id })
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        let [b] = self.take_array::<1>()?;
        Ok(b != 0)
    }

    pub fn read_byte(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_be_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEnd);
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        self.read_raw(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        Ok(String::from_utf8(self.read_binary()?)?)
    }

    pub fn read_field_begin(&mut self) -> Result<FieldHeader, CodecError> {
        let [tag] = self.take_array::<1>()?;
        let ttype = TType::try_from(tag)?;
        if ttype == TType::Stop {
            return Ok(FieldHeader { ttype, id: 0 });
        }
        let id = self.read_i16()?;
        Ok(FieldHeader { ttype, id })
    }

    pub fn read_list_begin(&mut self) -> Result<(TType, usize), CodecError> {
        let [tag] = self.take_array::<1>()?;
        let element = element_type(tag)?;
        let len = self.read_container_len(1)?;
        Ok((element, len))
    }

    /// Key type, value type and entry count of a map.
    pub fn read_map_begin(&mut self) -> Result<(TType, TType, usize), CodecError> {
        let [key, val] = self.take_array::<2>()?;
        let (key, val) = (element_type(key)?, element_type(val)?);
        let len = self.read_container_len(2)?;
        Ok((key, val, len))
    }

    /// Every element takes at least one byte, so a count larger than what is
    /// left of the frame cannot be genuine.
    fn read_container_len(&mut self, min_entry_size: usize) -> Result<usize, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let declared = len as usize;
        let remaining = self.remaining();
        if declared.saturating_mul(min_entry_size) > remaining {
            return Err(CodecError::OversizedContainer { declared, remaining });
        }
        Ok(declared)
    }

    /// Walk the fields of a struct, calling `on_field` for each until the stop byte.
    ///
    /// The callback must consume the field value, typically with [`Decoder::skip`]
    /// for fields it does not know.
    pub fn read_struct<F>(&mut self, mut on_field: F) -> Result<(), CodecError>
    where
        F: FnMut(&mut Self, FieldHeader) -> Result<(), CodecError>,
    {
        loop {
            let field = self.read_field_begin()?;
            if field.ttype == TType::Stop {
                return Ok(());
            }
            on_field(self, field)?;
        }
    }

    /// Consume and ignore a value of the given type.
    pub fn skip(&mut self, ttype: TType) -> Result<(), CodecError> {
        self.skip_depth(ttype, 0)
    }

    fn skip_depth(&mut self, ttype: TType, depth: usize) -> Result<(), CodecError> {
        if depth > MAX_SKIP_DEPTH {
            return Err(CodecError::DepthExceeded);
        }
        match ttype {
            TType::Stop | TType::Void => Ok(()),
            TType::Bool | TType::Byte => self.take_array::<1>().map(drop),
            TType::I16 => self.take_array::<2>().map(drop),
            TType::I32 => self.take_array::<4>().map(drop),
            TType::I64 | TType::Double => self.take_array::<8>().map(drop),
            TType::String => self.read_binary().map(drop),
            TType::Struct => loop {
                let field = self.read_field_begin()?;
                if field.ttype == TType::Stop {
                    return Ok(());
                }
                self.skip_depth(field.ttype, depth + 1)?;
            },
            TType::List | TType::Set => {
                let (element, len) = self.read_list_begin()?;
                for _ in 0..len {
                    self.skip_depth(element, depth + 1)?;
                }
                Ok(())
            }
            TType::Map => {
                let (key, val, len) = self.read_map_begin()?;
                for _ in 0..len {
                    self.skip_depth(key, depth + 1)?;
                    self.skip_depth(val, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

/// Container element tag; `Stop` and `Void` occupy no bytes and are refused.
fn element_type(tag: u8) -> Result<TType, CodecError> {
    match TType::try_from(tag)? {
        ttype @ (TType::Stop | TType::Void) => Err(CodecError::InvalidElementType(ttype)),
        ttype => Ok(ttype),
    }
}
