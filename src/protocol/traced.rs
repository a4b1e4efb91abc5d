//! Enhanced-protocol codec wrapper.
//!
//! # Responsibilities
//! - Behave exactly like [`BinaryProtocol`] until the peer agrees to upgrade
//! - Client: resolve the upgrade lazily on the first write
//! - Enhanced client: open a span and write a `RequestHeader` before each
//!   request, record the `ResponseHeader` before each reply
//! - Enhanced server: record the `RequestHeader` before each request, write a
//!   `ResponseHeader` before each reply
//!
//! # Design Decisions
//! - Upgrade state is a field of this connection, not shared
//! - Reads never trigger negotiation
//! - A transport failure marks the connection failed; the wire may be out of
//!   sync, so every later operation is refused

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{Decode, Decoder, Encode, MessageHeader, TType};
use crate::observability::metrics;
use crate::protocol::binary::BinaryProtocol;
use crate::protocol::headers::{ClientId, RequestHeader, ResponseHeader};
use crate::protocol::negotiation::{self, ProbeOutcome};
use crate::protocol::state::{ConnectionState, UpgradeState};
use crate::protocol::ProtocolError;
use crate::trace::scope::{self, SpanGuard};
use crate::trace::Sampler;

/// Which end of the connection this wrapper serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Binary protocol plus upgrade negotiation and trace headers.
#[derive(Debug)]
pub struct TracedProtocol<S> {
    inner: BinaryProtocol<S>,
    role: Role,
    state: Arc<ConnectionState>,
    client_id: ClientId,
    sampler: Sampler,
    open_span: Option<SpanGuard>,
    last_response: Option<ResponseHeader>,
    incoming: Option<RequestHeader>,
    failed: bool,
}

impl<S> TracedProtocol<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Client end: probes the peer on the first write.
    pub fn client(inner: BinaryProtocol<S>, client_id: ClientId, sampler: Sampler) -> Self {
        Self::with_role(inner, Role::Client, client_id, sampler)
    }

    /// Server end: upgraded by [`TracedProtocol::mark_enhanced`] after the probe reply.
    pub fn server(inner: BinaryProtocol<S>) -> Self {
        Self::with_role(inner, Role::Server, ClientId::anonymous(), Sampler::default())
    }

    fn with_role(inner: BinaryProtocol<S>, role: Role, client_id: ClientId, sampler: Sampler) -> Self {
        Self {
            inner,
            role,
            state: Arc::new(ConnectionState::new()),
            client_id,
            sampler,
            open_span: None,
            last_response: None,
            incoming: None,
            failed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn upgrade_state(&self) -> UpgradeState {
        self.state.get()
    }

    /// Shared handle for observing the state without holding the protocol.
    pub fn state_handle(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Response header of the most recent enhanced reply.
    pub fn last_response(&self) -> Option<&ResponseHeader> {
        self.last_response.as_ref()
    }

    /// Request header read with the most recent enhanced request.
    pub fn take_incoming(&mut self) -> Option<RequestHeader> {
        self.incoming.take()
    }

    /// Span announced by the request currently being written, if any.
    pub fn open_span(&self) -> Option<crate::trace::TraceId> {
        self.open_span.as_ref().map(SpanGuard::id)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Refuse further use, e.g. after a timeout left a reply in flight.
    pub fn mark_failed(&mut self) {
        self.failed = true;
        self.inner.discard_pending();
    }

    /// Server hook: the probe reply has been written.
    ///
    /// Returns false if the connection was already resolved.
    pub fn mark_enhanced(&self) -> bool {
        self.state.resolve(UpgradeState::Enhanced).is_ok()
    }

    fn ensure_usable(&self) -> Result<(), ProtocolError> {
        if self.failed {
            return Err(ProtocolError::ConnectionFailed);
        }
        Ok(())
    }

    fn fail_on_transport<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.mark_failed();
            }
        }
        result
    }

    async fn ensure_negotiated(&mut self) -> Result<(), ProtocolError> {
        if self.role != Role::Client || self.state.is_resolved() {
            return Ok(());
        }

        tracing::debug!(client_id = %self.client_id, "Attempting trace protocol upgrade");
        let result = negotiation::probe(&mut self.inner).await;
        let outcome = match self.fail_on_transport(result) {
            Ok(outcome) => outcome,
            Err(e) if !e.is_fatal() => {
                // The reply frame was read whole, so the stream is still in step.
                self.inner.read_message_end();
                tracing::warn!(error = %e, "Malformed upgrade reply, using binary");
                metrics::record_upgrade("malformed");
                if let Err(current) = self.state.resolve(UpgradeState::BaselineOnly) {
                    tracing::debug!(state = %current, "Upgrade state already resolved");
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match &outcome {
            ProbeOutcome::Accepted => {
                tracing::info!(client_id = %self.client_id, "Upgraded to trace protocol");
            }
            ProbeOutcome::Rejected(exc) => {
                tracing::warn!(
                    error = %exc,
                    "Unable to upgrade to trace protocol, falling back to binary"
                );
            }
            ProbeOutcome::Unrecognized { reply_name } => {
                tracing::debug!(
                    reply_name = %reply_name,
                    "Peer does not understand upgrade, using binary"
                );
            }
        }
        metrics::record_upgrade(outcome.label());

        if let Err(current) = self.state.resolve(outcome.resolved_state()) {
            tracing::debug!(state = %current, "Upgrade state already resolved");
        }
        Ok(())
    }

    /// Begin a message, negotiating first if this client has not yet.
    pub async fn write_message_begin(&mut self, header: &MessageHeader) -> Result<(), ProtocolError> {
        self.ensure_usable()?;
        self.ensure_negotiated().await?;

        if self.state.is_enhanced() {
            match self.role {
                Role::Client => {
                    // An exchange that was never completed must not parent this one.
                    self.open_span = None;
                    let span = scope::enter_span(&self.sampler);
                    let request = RequestHeader::for_span(
                        span.id(),
                        &self.client_id,
                        scope::broadcast_contexts(),
                    );
                    tracing::trace!(span = %span.id(), method = %header.name, "Writing request header");
                    self.inner.write(&request);
                    self.open_span = Some(span);
                }
                Role::Server => self.inner.write(&ResponseHeader::default()),
            }
        }

        self.inner.write_message_begin(header);
        Ok(())
    }

    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) {
        self.inner.write(value);
    }

    pub fn write_message_end(&mut self) {
        self.inner.write_message_end();
    }

    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        self.ensure_usable()?;
        let result = self.inner.flush().await;
        self.fail_on_transport(result)
    }

    /// Begin reading a message, consuming the trace header first when enhanced.
    pub async fn read_message_begin(&mut self) -> Result<MessageHeader, ProtocolError> {
        self.ensure_usable()?;
        let result = self.inner.next_frame().await;
        self.fail_on_transport(result)?;

        if self.state.is_enhanced() {
            match self.role {
                Role::Client => {
                    let header: ResponseHeader = self.inner.read()?;
                    scope::record_response(&header);
                    self.last_response = Some(header);
                }
                Role::Server => {
                    let header: RequestHeader = self.inner.read()?;
                    self.incoming = Some(header);
                }
            }
        }

        self.inner.decode_message_begin()
    }

    pub fn read<T: Decode>(&mut self) -> Result<T, ProtocolError> {
        self.inner.read()
    }

    pub fn skip(&mut self, ttype: TType) -> Result<(), ProtocolError> {
        self.inner.skip(ttype)
    }

    pub(crate) fn decoder(&mut self) -> &mut Decoder {
        self.inner.decoder()
    }

    pub fn read_message_end(&mut self) {
        self.inner.read_message_end();
    }

    /// The request/reply round trip is over: close its span.
    ///
    /// Call on every path, including errors and timeouts.
    pub fn complete_exchange(&mut self) {
        self.open_span = None;
    }
}
