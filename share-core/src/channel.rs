//! Framed message channel over any async byte stream.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::wire::{self, FrameDecodeError, FrameEncodeError, LEN_SIZE, MAX_FRAME_LEN};

/// Duplex stream plus the framing state needed to read one message at a time.
pub struct Channel<S> {
    stream: S,
    max_frame_len: u32,
}

/// Error sending or receiving a frame.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream closed mid-frame")]
    Truncated,
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(u64),
    #[error("encode error: {0}")]
    Encode(#[from] FrameEncodeError),
    /// The frame was read completely but its body is not valid JSON; the stream is still aligned.
    #[error("{0}")]
    Decode(#[from] FrameDecodeError),
}

impl ChannelError {
    /// Whether the connection can keep exchanging frames after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Decode(_) | ChannelError::Encode(_))
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Refuse incoming frames longer than `len` bytes.
    pub fn with_max_frame_len(mut self, len: u32) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Write one message as a single frame. `write_all` retries partial writes until the whole frame is out.
    pub async fn send<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), ChannelError> {
        let frame = wire::encode_frame(msg)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one message. `Ok(None)` when the stream ends before a length prefix is complete.
    pub async fn receive(&mut self) -> Result<Option<Value>, ChannelError> {
        let mut len_buf = [0u8; LEN_SIZE];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf);
        if len > self.max_frame_len {
            return Err(ChannelError::TooLarge(len as u64));
        }
        // Grows with the bytes that actually arrive; a bare prefix reserves nothing.
        let mut payload = Vec::new();
        (&mut self.stream)
            .take(u64::from(len))
            .read_to_end(&mut payload)
            .await?;
        if payload.len() < len as usize {
            return Err(ChannelError::Truncated);
        }
        Ok(Some(wire::decode_payload(&payload)?))
    }

    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
