//! RPC server: accept loop and per-connection dispatch.
//!
//! # Responsibilities
//! - Accept connections under the listener's limit
//! - Read messages, route them, write replies
//! - Answer the upgrade probe when the service allows it
//! - Run each handler inside the call chain described by its request header
//! - Drain connections on shutdown

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::codec::{ApplicationException, ApplicationExceptionKind, Encode, MessageHeader, MessageType, TType};
use crate::config::ServerConfig;
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::protocol::{BinaryProtocol, ProtocolError, TracedProtocol};
use crate::rpc::responder;
use crate::rpc::service::{Route, Service};
use crate::trace::{self, CallContext};
use crate::transport::FramedTransport;

/// Errors that end a connection or the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
}

/// Serves one [`Service`] on every accepted connection.
pub struct RpcServer {
    service: Arc<Service>,
    config: ServerConfig,
    tracker: ConnectionTracker,
}

impl RpcServer {
    pub fn new(service: Service, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Handle for observing open connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires, then wait for open connections to drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!(
            service = %self.service.name(),
            upgrade = self.service.supports_upgrade(),
            "Server accepting connections"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                        }
                        let guard = self.tracker.track();
                        let service = Arc::clone(&self.service);
                        let config = self.config.clone();

                        tokio::spawn(async move {
                            let _permit = permit;
                            let connection_id = guard.id();
                            tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Serving connection");

                            match serve_connection(stream, service, &config, connection_id).await {
                                Ok(()) => tracing::debug!(connection_id = %connection_id, "Peer closed connection"),
                                Err(e) => tracing::warn!(connection_id = %connection_id, error = %e, "Connection ended with error"),
                            }
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => return Err(ListenerError::Closed.into()),
                    Err(e) => {
                        // Usually transient (e.g. out of file descriptors).
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Server stopped accepting connections");
                    break;
                }
            }
        }

        let remaining = self
            .tracker
            .drain(Duration::from_millis(self.config.shutdown_grace_ms))
            .await;
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown grace period elapsed with open connections");
        }
        Ok(())
    }
}

/// Serve messages on one connection until the peer closes it.
pub async fn serve_connection<S>(
    stream: S,
    service: Arc<Service>,
    config: &ServerConfig,
    connection_id: ConnectionId,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let transport = FramedTransport::with_max_frame_size(stream, config.max_frame_size);
    let mut proto = TracedProtocol::server(BinaryProtocol::new(transport, config.strict_read));

    loop {
        let call = match proto.read_message_begin().await {
            Ok(call) => call,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let incoming = proto.take_incoming();

        if !matches!(call.kind, MessageType::Call | MessageType::Oneway) {
            tracing::warn!(
                connection_id = %connection_id,
                method = %call.name,
                kind = %call.kind,
                "Ignoring message that is not a call"
            );
            proto.read_message_end();
            continue;
        }

        let handler = match service.route(&call.name) {
            Route::Upgrade => {
                responder::answer_probe(&mut proto, &call, connection_id).await?;
                metrics::record_server_request(&call.name, "upgrade");
                continue;
            }
            Route::Unknown => {
                proto.skip(TType::Struct)?;
                proto.read_message_end();
                tracing::debug!(connection_id = %connection_id, method = %call.name, "Unknown method");
                metrics::record_server_request("unknown", "unknown_method");
                if call.kind == MessageType::Call {
                    let exc = ApplicationException::unknown_method(&call.name);
                    write_reply(&mut proto, &call, MessageType::Exception, &exc).await?;
                }
                continue;
            }
            Route::Method(handler) => Arc::clone(handler),
        };

        let fut = match handler(proto.decoder()) {
            Ok(fut) => fut,
            Err(e) => {
                proto.read_message_end();
                tracing::warn!(connection_id = %connection_id, method = %call.name, error = %e, "Malformed arguments");
                metrics::record_server_request(&call.name, "bad_request");
                if call.kind == MessageType::Call {
                    let exc = ApplicationException::new(ApplicationExceptionKind::ProtocolError, e.to_string());
                    write_reply(&mut proto, &call, MessageType::Exception, &exc).await?;
                }
                continue;
            }
        };
        proto.read_message_end();

        let span = tracing::info_span!(
            "rpc",
            method = %call.name,
            connection_id = %connection_id,
            trace_id = tracing::field::Empty,
            client_id = tracing::field::Empty,
        );
        let ctx = match &incoming {
            Some(header) => {
                span.record("trace_id", tracing::field::display(header.to_trace_id()));
                if let Some(client_id) = &header.client_id {
                    span.record("client_id", tracing::field::display(client_id));
                }
                CallContext::from_request(header)
            }
            None => CallContext::new(),
        };

        let result = trace::scope(ctx, fut).instrument(span).await;

        let label = if result.is_ok() { "ok" } else { "exception" };
        metrics::record_server_request(&call.name, label);

        if call.kind == MessageType::Oneway {
            if let Err(exc) = result {
                tracing::debug!(connection_id = %connection_id, method = %call.name, error = %exc, "Oneway handler failed");
            }
            continue;
        }

        match result {
            Ok(reply) => write_reply(&mut proto, &call, MessageType::Reply, reply.as_ref()).await?,
            Err(exc) => write_reply(&mut proto, &call, MessageType::Exception, &exc).await?,
        }
    }
}

async fn write_reply<S, T>(
    proto: &mut TracedProtocol<S>,
    call: &MessageHeader,
    kind: MessageType,
    body: &T,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Encode + ?Sized,
{
    proto
        .write_message_begin(&MessageHeader::new(call.name.clone(), kind, call.seq_id))
        .await?;
    proto.write(body);
    proto.write_message_end();
    proto.flush().await
}
