//! RPC client over one connection.
//!
//! # Responsibilities
//! - Assign sequence ids and match replies to calls
//! - Serialize exchanges on the connection (one request in flight)
//! - Run every call inside a call chain so its span has a parent
//! - Bound each call with the request timeout
//!
//! # Design Decisions
//! - A timeout fails the connection: the late reply would desynchronize it
//! - So does a call future dropped mid-exchange, see [`ExchangeGuard`]
//! - The span of a call is closed on every path, success or not

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};

use crate::codec::{ApplicationException, Decode, Encode, MessageHeader, MessageType};
use crate::config::{ClientConfig, TracingConfig};
use crate::observability::metrics;
use crate::protocol::{
    BinaryProtocol, ClientId, ConnectionState, ProtocolError, ResponseHeader, TracedProtocol,
    UpgradeState,
};
use crate::trace::{self, CallContext, Sampler};
use crate::transport::FramedTransport;

/// Client call errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("remote exception: {0}")]
    Application(ApplicationException),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("reply for '{actual}' does not match call '{expected}'")]
    WrongMethodName { expected: String, actual: String },

    #[error("reply sequence id {actual} does not match call {expected}")]
    BadSequenceId { expected: i32, actual: i32 },

    #[error("unexpected {0} message in reply")]
    UnexpectedMessageType(MessageType),
}

impl ClientError {
    fn label(&self) -> &'static str {
        match self {
            ClientError::Application(_) => "exception",
            ClientError::Timeout(_) => "timeout",
            ClientError::Connect { .. } | ClientError::ConnectTimeout(_) => "connect_error",
            ClientError::Protocol(_)
            | ClientError::WrongMethodName { .. }
            | ClientError::BadSequenceId { .. }
            | ClientError::UnexpectedMessageType(_) => "protocol_error",
        }
    }
}

struct Connection<S> {
    proto: TracedProtocol<S>,
    next_seq: i32,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn next_seq(&mut self) -> i32 {
        let seq = self.next_seq;
        // Zero belongs to the upgrade probe.
        self.next_seq = self.next_seq.checked_add(1).unwrap_or(1);
        seq
    }

    async fn send<A>(&mut self, method: &str, kind: MessageType, seq: i32, args: &A) -> Result<(), ClientError>
    where
        A: Encode + ?Sized,
    {
        self.proto
            .write_message_begin(&MessageHeader::new(method, kind, seq))
            .await?;
        self.proto.write(args);
        self.proto.write_message_end();
        self.proto.flush().await?;
        Ok(())
    }

    async fn round_trip<A, R>(&mut self, method: &str, seq: i32, args: &A) -> Result<R, ClientError>
    where
        A: Encode + ?Sized,
        R: Decode,
    {
        self.send(method, MessageType::Call, seq, args).await?;

        let reply = self.proto.read_message_begin().await?;
        if reply.name != method {
            self.proto.read_message_end();
            return Err(ClientError::WrongMethodName {
                expected: method.to_string(),
                actual: reply.name,
            });
        }
        if reply.seq_id != seq {
            self.proto.read_message_end();
            return Err(ClientError::BadSequenceId {
                expected: seq,
                actual: reply.seq_id,
            });
        }

        let result = match reply.kind {
            MessageType::Reply => Ok(self.proto.read::<R>()?),
            MessageType::Exception => {
                Err(ClientError::Application(self.proto.read::<ApplicationException>()?))
            }
            other => Err(ClientError::UnexpectedMessageType(other)),
        };
        self.proto.read_message_end();
        result
    }
}

/// Exclusive hold on the connection for one exchange.
///
/// If it is dropped while armed, the caller abandoned the call between
/// writing the request and reading its reply (or mid-probe). The span is
/// closed and the connection failed, since the stream can no longer be
/// matched to calls.
struct ExchangeGuard<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn: MutexGuard<'a, Connection<S>>,
    armed: bool,
}

impl<'a, S> ExchangeGuard<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(conn: MutexGuard<'a, Connection<S>>) -> Self {
        Self { conn, armed: true }
    }

    /// The exchange ran to an outcome; close its span normally.
    fn finish(&mut self) {
        self.armed = false;
        self.conn.proto.complete_exchange();
    }
}

impl<S> Deref for ExchangeGuard<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Target = Connection<S>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<S> DerefMut for ExchangeGuard<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<S> Drop for ExchangeGuard<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Call abandoned mid-exchange, closing connection");
        self.conn.proto.complete_exchange();
        self.conn.proto.mark_failed();
    }
}

/// A client bound to one connection.
///
/// Calls from concurrent tasks are serialized; the first one to write
/// resolves the trace upgrade for all of them.
pub struct Client<S = TcpStream> {
    conn: Mutex<Connection<S>>,
    state: Arc<ConnectionState>,
    last_response: ArcSwapOption<ResponseHeader>,
    request_timeout: Duration,
}

impl Client<TcpStream> {
    /// Connect to `config.address`.
    pub async fn connect(config: &ClientConfig, tracing_config: &TracingConfig) -> Result<Self, ClientError> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| ClientError::ConnectTimeout(config.address.clone()))?
            .map_err(|source| ClientError::Connect {
                address: config.address.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        tracing::debug!(address = %config.address, "Connected");
        Ok(Self::from_stream(stream, config, tracing_config))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already open stream.
    pub fn from_stream(stream: S, config: &ClientConfig, tracing_config: &TracingConfig) -> Self {
        let transport = FramedTransport::with_max_frame_size(stream, config.max_frame_size);
        let proto = TracedProtocol::client(
            BinaryProtocol::new(transport, config.strict_read),
            ClientId::from(config.client_id.clone()),
            Sampler::new(tracing_config.sample_rate),
        );
        let state = proto.state_handle();

        Self {
            conn: Mutex::new(Connection { proto, next_seq: 1 }),
            state,
            last_response: ArcSwapOption::empty(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Negotiated mode of the connection; `Unknown` until the first call.
    pub fn upgrade_state(&self) -> UpgradeState {
        self.state.get()
    }

    /// Response header of the most recent enhanced reply on this connection.
    ///
    /// Does not wait for a call in flight.
    pub fn last_response(&self) -> Option<ResponseHeader> {
        self.last_response.load_full().map(|header| ResponseHeader::clone(&header))
    }

    /// Call `method` and wait for its reply.
    ///
    /// Outside a call chain a fresh one is started, so every call gets a span.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Encode + ?Sized,
        R: Decode,
    {
        let result = if trace::in_scope() {
            self.exchange(method, args).await
        } else {
            trace::scope(CallContext::new(), self.exchange(method, args)).await
        };

        metrics::record_client_call(match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        });
        result
    }

    /// Send a oneway message; no reply is read.
    pub async fn call_oneway<A>(&self, method: &str, args: &A) -> Result<(), ClientError>
    where
        A: Encode + ?Sized,
    {
        let send = async {
            let mut conn = ExchangeGuard::new(self.conn.lock().await);
            let seq = conn.next_seq();
            let result = tokio::time::timeout(
                self.request_timeout,
                conn.send(method, MessageType::Oneway, seq, args),
            )
            .await;
            conn.finish();
            self.settle(&mut conn, result)
        };

        let result = if trace::in_scope() {
            send.await
        } else {
            trace::scope(CallContext::new(), send).await
        };

        metrics::record_client_call(match &result {
            Ok(()) => "oneway",
            Err(e) => e.label(),
        });
        result
    }

    async fn exchange<A, R>(&self, method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Encode + ?Sized,
        R: Decode,
    {
        let mut conn = ExchangeGuard::new(self.conn.lock().await);
        let seq = conn.next_seq();
        let result =
            tokio::time::timeout(self.request_timeout, conn.round_trip::<A, R>(method, seq, args)).await;
        conn.finish();
        if let Some(header) = conn.proto.last_response() {
            self.last_response.store(Some(Arc::new(header.clone())));
        }
        self.settle(&mut conn, result)
    }

    fn settle<T>(
        &self,
        conn: &mut Connection<S>,
        result: Result<Result<T, ClientError>, tokio::time::error::Elapsed>,
    ) -> Result<T, ClientError> {
        match result {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.request_timeout, "Call timed out, closing connection");
                conn.proto.mark_failed();
                Err(ClientError::Timeout(self.request_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ApplicationExceptionKind, Empty};
    use crate::protocol::{RequestHeader, UpgradeReply, UPGRADE_METHOD};
    use crate::trace::TraceId;
    use tokio::io::DuplexStream;

    fn client_with_peer(timeout_ms: u64) -> (Client<DuplexStream>, BinaryProtocol<DuplexStream>) {
        let (a, b) = tokio::io::duplex(8192);
        let config = ClientConfig {
            client_id: Some("svc-a".into()),
            request_timeout_ms: timeout_ms,
            ..ClientConfig::default()
        };
        let client = Client::from_stream(a, &config, &TracingConfig::default());
        (client, BinaryProtocol::new(FramedTransport::new(b), true))
    }

    async fn accept_probe(peer: &mut BinaryProtocol<DuplexStream>) {
        let probe = peer.read_message_begin().await.unwrap();
        assert_eq!(probe.name, UPGRADE_METHOD);
        peer.read_message_end();
        peer.write_message_begin(&MessageHeader::new(UPGRADE_METHOD, MessageType::Reply, probe.seq_id));
        peer.write(&UpgradeReply);
        peer.flush().await.unwrap();
    }

    async fn read_traced_call(peer: &mut BinaryProtocol<DuplexStream>) -> (RequestHeader, MessageHeader) {
        peer.next_frame().await.unwrap();
        let header: RequestHeader = peer.read().unwrap();
        let call = peer.decode_message_begin().unwrap();
        peer.read_message_end();
        (header, call)
    }

    async fn refuse_probe(peer: &mut BinaryProtocol<DuplexStream>) {
        let probe = peer.read_message_begin().await.unwrap();
        assert_eq!(probe.name, UPGRADE_METHOD);
        assert_eq!(probe.seq_id, 0);
        peer.read_message_end();
        peer.write_message_begin(&MessageHeader::new(UPGRADE_METHOD, MessageType::Exception, 0));
        peer.write(&ApplicationException::unknown_method(UPGRADE_METHOD));
        peer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn remote_exception_is_application_error() {
        let (client, mut peer) = client_with_peer(1_000);
        tokio::spawn(async move {
            refuse_probe(&mut peer).await;
            let call = peer.read_message_begin().await.unwrap();
            peer.read_message_end();
            peer.write_message_begin(&MessageHeader::new(call.name, MessageType::Exception, call.seq_id));
            peer.write(&ApplicationException::internal("boom"));
            peer.flush().await.unwrap();
        });

        let err = client.call::<_, Empty>("ping", &Empty).await.unwrap_err();
        match err {
            ClientError::Application(exc) => {
                assert_eq!(exc.kind, ApplicationExceptionKind::InternalError);
                assert_eq!(exc.message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.upgrade_state(), UpgradeState::BaselineOnly);
    }

    #[tokio::test]
    async fn mismatched_sequence_id_detected() {
        let (client, mut peer) = client_with_peer(1_000);
        tokio::spawn(async move {
            refuse_probe(&mut peer).await;
            let call = peer.read_message_begin().await.unwrap();
            peer.read_message_end();
            peer.write_message_begin(&MessageHeader::new(call.name, MessageType::Reply, call.seq_id + 40));
            peer.write(&Empty);
            peer.flush().await.unwrap();
        });

        let err = client.call::<_, Empty>("ping", &Empty).await.unwrap_err();
        assert!(matches!(err, ClientError::BadSequenceId { expected: 1, actual: 41 }));
    }

    #[tokio::test]
    async fn timeout_fails_connection_and_closes_span() {
        let (client, mut peer) = client_with_peer(100);
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let _peer = tokio::spawn(async move {
            accept_probe(&mut peer).await;
            let (header, _) = read_traced_call(&mut peer).await;
            let _ = seen_tx.send(header);
            // Never answer.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let parent = TraceId::root(true);
        trace::scope(CallContext::with_parent(parent), async {
            let (result, ()) = tokio::join!(client.call::<_, Empty>("ping", &Empty), async {
                let header = seen_rx.await.unwrap();
                assert_eq!(trace::depth(), 1);
                let open = trace::current().unwrap();
                assert_eq!(header.to_trace_id(), open);
                assert_eq!(open.parent_id(), parent.span_id());
            });
            assert!(matches!(result, Err(ClientError::Timeout(_))));
            assert_eq!(trace::depth(), 0);
            assert_eq!(trace::current(), Some(parent));
        })
        .await;

        assert_eq!(client.upgrade_state(), UpgradeState::Enhanced);
        let err = client.call::<_, Empty>("ping", &Empty).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ConnectionFailed)
        ));
    }

    #[tokio::test]
    async fn abandoned_call_fails_connection_and_closes_span() {
        let (client, mut peer) = client_with_peer(1_000);
        let _peer = tokio::spawn(async move {
            accept_probe(&mut peer).await;
            let (_, call) = read_traced_call(&mut peer).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            peer.write(&ResponseHeader::default());
            peer.write_message_begin(&MessageHeader::new(call.name, MessageType::Reply, call.seq_id));
            peer.write(&Empty);
            let _ = peer.flush().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        trace::scope(CallContext::new(), async {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(50),
                client.call::<_, Empty>("ping", &Empty),
            )
            .await;
            assert!(abandoned.is_err());
            assert_eq!(trace::depth(), 0);
            assert!(trace::current().is_none());

            // The late reply must never be taken for this call's.
            let err = client.call::<_, Empty>("ping", &Empty).await.unwrap_err();
            assert!(matches!(
                err,
                ClientError::Protocol(ProtocolError::ConnectionFailed)
            ));
            assert_eq!(trace::depth(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn abandoned_upgrade_is_not_retried() {
        let (client, mut peer) = client_with_peer(1_000);
        let peer_task = tokio::spawn(async move {
            let probe = peer.read_message_begin().await.unwrap();
            assert_eq!(probe.name, UPGRADE_METHOD);
            peer.read_message_end();
            // Nothing else may arrive.
            tokio::time::timeout(Duration::from_millis(300), peer.read_message_begin())
                .await
                .is_err()
        });

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.call::<_, Empty>("ping", &Empty),
        )
        .await;
        assert!(abandoned.is_err());

        let err = client.call::<_, Empty>("ping", &Empty).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ConnectionFailed)
        ));
        assert_eq!(client.upgrade_state(), UpgradeState::Unknown);
        assert!(peer_task.await.unwrap());
    }

    #[tokio::test]
    async fn last_response_readable_during_a_call() {
        let (client, mut peer) = client_with_peer(1_000);
        let client = Arc::new(client);
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let mut seen_tx = Some(seen_tx);
        let _peer = tokio::spawn(async move {
            accept_probe(&mut peer).await;
            for seq in 1..=2 {
                let (_, call) = read_traced_call(&mut peer).await;
                if seq == 2 {
                    if let Some(seen_tx) = seen_tx.take() {
                        let _ = seen_tx.send(());
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                peer.write(&ResponseHeader::default());
                peer.write_message_begin(&MessageHeader::new(call.name, MessageType::Reply, call.seq_id));
                peer.write(&Empty);
                peer.flush().await.unwrap();
            }
        });

        assert!(client.last_response().is_none());
        client.call::<_, Empty>("ping", &Empty).await.unwrap();

        let in_flight = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call::<_, Empty>("ping", &Empty).await }
        });
        seen_rx.await.unwrap();
        assert_eq!(client.last_response(), Some(ResponseHeader::default()));
        in_flight.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oneway_does_not_wait_for_reply() {
        let (client, mut peer) = client_with_peer(1_000);
        let peer_task = tokio::spawn(async move {
            refuse_probe(&mut peer).await;
            let note = peer.read_message_begin().await.unwrap();
            (note.name, note.kind, note.seq_id)
        });

        client.call_oneway("note", &Empty).await.unwrap();
        assert_eq!(
            peer_task.await.unwrap(),
            ("note".to_string(), MessageType::Oneway, 1)
        );
    }
}
