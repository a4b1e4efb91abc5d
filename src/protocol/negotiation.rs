//! Client side of the upgrade handshake.
//!
//! The probe is an ordinary call to a reserved method, so a legacy peer
//! rejects it through its normal unknown-method path.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{ApplicationException, MessageHeader, MessageType};
use crate::protocol::binary::BinaryProtocol;
use crate::protocol::headers::{ConnectionOptions, UpgradeReply, UPGRADE_METHOD};
use crate::protocol::state::UpgradeState;
use crate::protocol::ProtocolError;

/// Sequence id used by the probe call.
pub const PROBE_SEQ_ID: i32 = 0;

/// How the peer answered the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Peer replied with an upgrade reply.
    Accepted,
    /// Peer answered with an application exception, typically unknown method.
    Rejected(ApplicationException),
    /// Peer replied under some other method name.
    Unrecognized { reply_name: String },
}

impl ProbeOutcome {
    /// Mode the connection settles in after this outcome.
    pub fn resolved_state(&self) -> UpgradeState {
        match self {
            ProbeOutcome::Accepted => UpgradeState::Enhanced,
            ProbeOutcome::Rejected(_) | ProbeOutcome::Unrecognized { .. } => {
                UpgradeState::BaselineOnly
            }
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Accepted => "enhanced",
            ProbeOutcome::Rejected(_) => "rejected",
            ProbeOutcome::Unrecognized { .. } => "unsupported",
        }
    }
}

/// Send the probe over the baseline protocol and classify the answer.
///
/// Transport and decode failures are returned as errors; only the peer's
/// refusal is turned into an outcome.
pub async fn probe<S>(proto: &mut BinaryProtocol<S>) -> Result<ProbeOutcome, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    proto.write_message_begin(&MessageHeader::new(
        UPGRADE_METHOD,
        MessageType::Call,
        PROBE_SEQ_ID,
    ));
    proto.write(&ConnectionOptions);
    proto.write_message_end();
    proto.flush().await?;

    let reply = proto.read_message_begin().await?;
    if reply.name != UPGRADE_METHOD {
        proto.read_message_end();
        return Ok(ProbeOutcome::Unrecognized {
            reply_name: reply.name,
        });
    }

    if reply.kind == MessageType::Exception {
        let exc: ApplicationException = proto.read()?;
        proto.read_message_end();
        return Ok(ProbeOutcome::Rejected(exc));
    }

    let _: UpgradeReply = proto.read()?;
    proto.read_message_end();
    Ok(ProbeOutcome::Accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ApplicationExceptionKind, Encode};
    use crate::transport::FramedTransport;
    use tokio::io::DuplexStream;

    /// Run the probe against a peer that answers with `kind`/`name`/`body`.
    async fn probe_against<B>(name: &str, kind: MessageType, body: B) -> ProbeOutcome
    where
        B: Encode + Send + 'static,
    {
        let (a, b) = tokio::io::duplex(4096);
        let name = name.to_string();
        let peer = tokio::spawn(async move {
            let mut peer: BinaryProtocol<DuplexStream> =
                BinaryProtocol::new(FramedTransport::new(b), true);
            let call = peer.read_message_begin().await.unwrap();
            assert_eq!(call.name, UPGRADE_METHOD);
            assert_eq!(call.kind, MessageType::Call);
            assert_eq!(call.seq_id, PROBE_SEQ_ID);
            let _: ConnectionOptions = peer.read().unwrap();
            peer.read_message_end();

            peer.write_message_begin(&MessageHeader::new(name, kind, call.seq_id));
            peer.write(&body);
            peer.flush().await.unwrap();
        });

        let mut client = BinaryProtocol::new(FramedTransport::new(a), true);
        let outcome = probe(&mut client).await.unwrap();
        peer.await.unwrap();
        outcome
    }

    #[tokio::test]
    async fn upgrade_reply_is_accepted() {
        let outcome = probe_against(UPGRADE_METHOD, MessageType::Reply, UpgradeReply).await;
        assert_eq!(outcome, ProbeOutcome::Accepted);
        assert_eq!(outcome.resolved_state(), UpgradeState::Enhanced);
    }

    #[tokio::test]
    async fn exception_is_a_rejection() {
        let exc = ApplicationException::unknown_method(UPGRADE_METHOD);
        let outcome = probe_against(UPGRADE_METHOD, MessageType::Exception, exc.clone()).await;
        assert_eq!(outcome, ProbeOutcome::Rejected(exc));
        assert_eq!(outcome.resolved_state(), UpgradeState::BaselineOnly);
        if let ProbeOutcome::Rejected(e) = outcome {
            assert_eq!(e.kind, ApplicationExceptionKind::UnknownMethod);
        }
    }

    #[tokio::test]
    async fn other_method_name_is_unrecognized() {
        let outcome = probe_against("something_else", MessageType::Reply, UpgradeReply).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Unrecognized {
                reply_name: "something_else".into()
            }
        );
        assert_eq!(outcome.resolved_state(), UpgradeState::BaselineOnly);
    }

    #[tokio::test]
    async fn dropped_connection_is_an_error() {
        let (a, b) = tokio::io::duplex(4096);
        let peer = tokio::spawn(async move {
            let mut peer = BinaryProtocol::new(FramedTransport::new(b), true);
            let _ = peer.read_message_begin().await.unwrap();
            // Hang up without answering.
        });

        let mut client = BinaryProtocol::new(FramedTransport::new(a), true);
        let err = probe(&mut client).await.unwrap_err();
        peer.await.unwrap();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
