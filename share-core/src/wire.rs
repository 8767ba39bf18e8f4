//! Framing: length-prefix (4 bytes BE) + UTF-8 JSON payload.

use serde::Serialize;
use serde_json::Value;

pub const LEN_SIZE: usize = 4;
/// Largest payload representable in the length prefix.
pub const MAX_FRAME_LEN: u32 = u32::MAX;

/// Encode a message into a single frame: 4 bytes BE length + JSON payload.
pub fn encode_frame<T: Serialize + ?Sized>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(msg)?;
    let len = encoded_len(payload.len())?;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Length prefix for a payload of `n` bytes, or `TooLarge` if it does not fit.
pub fn encoded_len(n: usize) -> Result<u32, FrameEncodeError> {
    u32::try_from(n).map_err(|_| FrameEncodeError::TooLarge)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Parse a frame body. The body must be UTF-8 JSON.
pub fn decode_payload(payload: &[u8]) -> Result<Value, FrameDecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

/// Error decoding a frame body (bad UTF-8 or JSON failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
