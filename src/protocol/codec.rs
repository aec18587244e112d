//! Frame codec
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────────┐
//! │ Len (4, BE)  │ CRC32 (4,BE) │     bincode(message)        │
//! └──────────────┴──────────────┴─────────────────────────────┘
//! ```
//!
//! The checksum covers the body only.

use super::{RpcRequest, RpcResponse};
use crate::common::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size: 4 bytes length + 4 bytes CRC32
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum body size (64 MB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Serialize `message` into a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(Error::InvalidArgument(format!(
            "message too large: {} bytes (max {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_u32(crc32fast::hash(&body));
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Deserialize a frame body.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(body)?)
}

pub fn encode_request(request: &RpcRequest) -> Result<Bytes> {
    encode_frame(request)
}

pub fn encode_response(response: &RpcResponse) -> Result<Bytes> {
    encode_frame(response)
}

pub fn decode_request(body: &[u8]) -> Result<RpcRequest> {
    decode_body(body)
}

pub fn decode_response(body: &[u8]) -> Result<RpcResponse> {
    decode_body(body)
}

/// Read one frame body.
///
/// Returns `Ok(None)` on a clean end of stream before any header byte.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < FRAME_HEADER_SIZE {
        reader.read_exact(&mut header[n..]).await?;
    }

    let body_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if body_len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes (max {})",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let mut body = BytesMut::zeroed(body_len as usize);
    reader.read_exact(&mut body).await?;

    let actual = crc32fast::hash(&body);
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    Ok(Some(body.freeze()))
}

/// Write a pre-encoded frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
