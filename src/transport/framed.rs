//! Length-prefixed framing over any async byte stream.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors raised by the framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
}

impl TransportError {
    /// True when the peer went away mid-frame.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
            ),
            TransportError::FrameTooLarge { .. } => false,
        }
    }
}

/// A byte stream that exchanges whole frames.
///
/// Each frame is a big-endian `u32` length followed by that many bytes.
#[derive(Debug)]
pub struct FramedTransport<S> {
    stream: S,
    max_frame_size: usize,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream,
            max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Write one frame and flush the stream.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame. Returns `None` when the peer closed between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut len_buf = [0u8; 4];
        let first = self.stream.read(&mut len_buf).await?;
        if first == 0 {
            return Ok(None);
        }
        if first < len_buf.len() {
            self.stream.read_exact(&mut len_buf[first..]).await?;
        }

        let size = u32::from_be_bytes(len_buf) as usize;
        if size > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; size];
        self.stream.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}
