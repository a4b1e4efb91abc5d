//! Baseline message protocol: envelopes and records over a framed transport.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{Decode, Decoder, Encode, Encoder, MessageHeader, TType};
use crate::protocol::ProtocolError;
use crate::transport::FramedTransport;

/// Plain binary protocol. One message per frame.
#[derive(Debug)]
pub struct BinaryProtocol<S> {
    transport: FramedTransport<S>,
    encoder: Encoder,
    decoder: Decoder,
    strict_read: bool,
}

impl<S> BinaryProtocol<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: FramedTransport<S>, strict_read: bool) -> Self {
        Self {
            transport,
            encoder: Encoder::new(),
            decoder: Decoder::default(),
            strict_read,
        }
    }

    pub fn transport(&self) -> &FramedTransport<S> {
        &self.transport
    }

    pub fn write_message_begin(&mut self, header: &MessageHeader) {
        self.encoder.write_message_begin(header);
    }

    pub fn write_message_end(&mut self) {}

    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) {
        value.encode(&mut self.encoder);
    }

    /// Send everything written since the last flush as one frame.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        if self.encoder.is_empty() {
            return Ok(());
        }
        let frame = self.encoder.take();
        self.transport.write_frame(&frame).await?;
        Ok(())
    }

    /// Drop a partially written message.
    pub fn discard_pending(&mut self) {
        self.encoder.clear();
    }

    pub async fn read_message_begin(&mut self) -> Result<MessageHeader, ProtocolError> {
        self.next_frame().await?;
        self.decode_message_begin()
    }

    /// Load the next frame for reading, discarding anything left of the last one.
    pub(crate) async fn next_frame(&mut self) -> Result<(), ProtocolError> {
        let leftover = self.decoder.finish();
        if leftover > 0 {
            tracing::debug!(leftover, "discarding unread bytes of previous frame");
        }
        match self.transport.read_frame().await? {
            Some(frame) => {
                self.decoder = Decoder::new(frame);
                Ok(())
            }
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub(crate) fn decode_message_begin(&mut self) -> Result<MessageHeader, ProtocolError> {
        Ok(self.decoder.read_message_begin(self.strict_read)?)
    }

    pub(crate) fn decoder(&mut self) -> &mut Decoder {
        &mut self.decoder
    }

    pub fn read<T: Decode>(&mut self) -> Result<T, ProtocolError> {
        Ok(T::decode(&mut self.decoder)?)
    }

    pub fn skip(&mut self, ttype: TType) -> Result<(), ProtocolError> {
        Ok(self.decoder.skip(ttype)?)
    }

    pub fn read_message_end(&mut self) {
        let trailing = self.decoder.finish();
        if trailing > 0 {
            tracing::trace!(trailing, "unread bytes after message body");
        }
    }
}
