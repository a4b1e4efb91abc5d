//! Trace header records and upgrade payloads.
//!
//! Field ids follow the Finagle `tracing.thrift` definitions so enhanced
//! peers on other stacks can read them:
//!
//! ```text
//! RequestHeader  { 1: i64 trace_id, 2: i64 span_id, 3: optional i64 parent_span_id,
//!                  5: optional bool sampled, 6: optional ClientId client_id,
//!                  7: optional i64 flags, 8: list<RequestContext> contexts,
//!                  9: optional string dest }
//! ResponseHeader { 1: list<RequestContext> contexts }
//! ClientId       { 1: string name }
//! RequestContext { 1: binary key, 2: binary value }
//! ConnectionOptions {}   UpgradeReply {}
//! ```

use std::fmt;

use crate::codec::{CodecError, Decode, Decoder, Encode, Encoder, TType};
use crate::trace::TraceId;

/// Reserved method name of the upgrade probe.
pub const UPGRADE_METHOD: &str = "__can__finagle__trace__v3__";

/// Identity of the calling service, attached to every request header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub name: Option<String>,
}

impl ClientId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { name: None }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl From<Option<String>> for ClientId {
    fn from(name: Option<String>) -> Self {
        Self { name }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("<anonymous>"))
    }
}

impl Encode for ClientId {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            if let Some(name) = &self.name {
                e.field(1, TType::String).write_string(name);
            }
        });
    }
}

impl Decode for ClientId {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut name = None;
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (1, TType::String) => {
                name = Some(d.read_string()?);
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(Self { name })
    }
}

/// A broadcast key/value pair carried with a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Encode for RequestContext {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            e.field(1, TType::String).write_binary(&self.key);
            e.field(2, TType::String).write_binary(&self.value);
        });
    }
}

impl Decode for RequestContext {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut ctx = RequestContext::default();
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (1, TType::String) => {
                ctx.key = d.read_binary()?;
                Ok(())
            }
            (2, TType::String) => {
                ctx.value = d.read_binary()?;
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(ctx)
    }
}

fn write_contexts(encoder: &mut Encoder, id: i16, contexts: &[RequestContext]) {
    encoder
        .field(id, TType::List)
        .write_list_begin(TType::Struct, contexts.len());
    for ctx in contexts {
        ctx.encode(encoder);
    }
}

fn read_contexts(decoder: &mut Decoder) -> Result<Vec<RequestContext>, CodecError> {
    let (element, len) = decoder.read_list_begin()?;
    let mut out = Vec::with_capacity(len.min(64));
    for _ in 0..len {
        if element == TType::Struct {
            out.push(RequestContext::decode(decoder)?);
        } else {
            decoder.skip(element)?;
        }
    }
    Ok(out)
}

/// Header written before every request in enhanced mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    pub trace_id: i64,
    pub span_id: i64,
    pub parent_span_id: Option<i64>,
    pub sampled: Option<bool>,
    pub client_id: Option<ClientId>,
    pub flags: Option<i64>,
    pub contexts: Vec<RequestContext>,
    pub dest: Option<String>,
}

impl RequestHeader {
    /// Header announcing `span` on behalf of `client_id`.
    pub fn for_span(span: TraceId, client_id: &ClientId, contexts: Vec<RequestContext>) -> Self {
        Self {
            trace_id: span.trace_id() as i64,
            span_id: span.span_id() as i64,
            parent_span_id: Some(span.parent_id() as i64),
            sampled: Some(span.sampled()),
            client_id: Some(client_id.clone()),
            flags: None,
            contexts,
            dest: None,
        }
    }

    /// The span this header announces. A missing parent means a root span;
    /// a missing sampling decision is treated as not sampled.
    pub fn to_trace_id(&self) -> TraceId {
        let trace_id = self.trace_id as u64;
        TraceId::from_parts(
            trace_id,
            self.parent_span_id.map_or(trace_id, |p| p as u64),
            self.span_id as u64,
            self.sampled.unwrap_or(false),
        )
    }
}

impl Encode for RequestHeader {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            e.field(1, TType::I64).write_i64(self.trace_id);
            e.field(2, TType::I64).write_i64(self.span_id);
            if let Some(parent) = self.parent_span_id {
                e.field(3, TType::I64).write_i64(parent);
            }
            if let Some(sampled) = self.sampled {
                e.field(5, TType::Bool).write_bool(sampled);
            }
            if let Some(client_id) = &self.client_id {
                e.write_field_begin(TType::Struct, 6);
                client_id.encode(e);
            }
            if let Some(flags) = self.flags {
                e.field(7, TType::I64).write_i64(flags);
            }
            write_contexts(e, 8, &self.contexts);
            if let Some(dest) = &self.dest {
                e.field(9, TType::String).write_string(dest);
            }
        });
    }
}

impl Decode for RequestHeader {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut header = RequestHeader::default();
        let (mut has_trace, mut has_span) = (false, false);
        decoder.read_struct(|d, field| {
            match (field.id, field.ttype) {
                (1, TType::I64) => {
                    header.trace_id = d.read_i64()?;
                    has_trace = true;
                }
                (2, TType::I64) => {
                    header.span_id = d.read_i64()?;
                    has_span = true;
                }
                (3, TType::I64) => header.parent_span_id = Some(d.read_i64()?),
                (5, TType::Bool) => header.sampled = Some(d.read_bool()?),
                (6, TType::Struct) => header.client_id = Some(ClientId::decode(d)?),
                (7, TType::I64) => header.flags = Some(d.read_i64()?),
                (8, TType::List) => header.contexts = read_contexts(d)?,
                (9, TType::String) => header.dest = Some(d.read_string()?),
                (_, ttype) => d.skip(ttype)?,
            }
            Ok(())
        })?;
        if !has_trace {
            return Err(CodecError::MissingField {
                record: "RequestHeader",
                field: "trace_id",
            });
        }
        if !has_span {
            return Err(CodecError::MissingField {
                record: "RequestHeader",
                field: "span_id",
            });
        }
        Ok(header)
    }
}

/// Header written before every reply in enhanced mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub contexts: Vec<RequestContext>,
}

impl Encode for ResponseHeader {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| write_contexts(e, 1, &self.contexts));
    }
}

impl Decode for ResponseHeader {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut header = ResponseHeader::default();
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (1, TType::List) => {
                header.contexts = read_contexts(d)?;
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(header)
    }
}

/// Probe request payload. Carries no options today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionOptions;

impl Encode for ConnectionOptions {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_field_stop();
    }
}

impl Decode for ConnectionOptions {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        decoder.skip(TType::Struct)?;
        Ok(ConnectionOptions)
    }
}

/// Probe success payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeReply;

impl Encode for UpgradeReply {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_field_stop();
    }
}

impl Decode for UpgradeReply {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        decoder.skip(TType::Struct)?;
        Ok(UpgradeReply)
    }
}
