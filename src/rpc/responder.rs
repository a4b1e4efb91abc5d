//! Server side of the trace upgrade.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{MessageHeader, MessageType};
use crate::net::ConnectionId;
use crate::protocol::{ConnectionOptions, ProtocolError, TracedProtocol, UpgradeReply, UPGRADE_METHOD};

/// Answer an upgrade probe whose envelope has already been read.
///
/// The reply goes out in the connection's current mode; the connection is
/// marked enhanced only once it has been flushed, so the probe reply never
/// carries a response header.
pub(crate) async fn answer_probe<S>(
    proto: &mut TracedProtocol<S>,
    call: &MessageHeader,
    connection_id: ConnectionId,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _options: ConnectionOptions = proto.read()?;
    proto.read_message_end();

    let reply = MessageHeader::new(UPGRADE_METHOD, MessageType::Reply, call.seq_id);
    proto.write_message_begin(&reply).await?;
    proto.write(&UpgradeReply);
    proto.write_message_end();
    proto.flush().await?;

    if proto.mark_enhanced() {
        tracing::info!(connection_id = %connection_id, "Connection upgraded to trace protocol");
    } else {
        tracing::debug!(
            connection_id = %connection_id,
            state = %proto.upgrade_state(),
            "Repeated upgrade probe"
        );
    }
    Ok(())
}
