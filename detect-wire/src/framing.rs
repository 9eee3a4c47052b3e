//! Length-prefixed framing shared by both directions of the connection.
//!
//! ```text
//! ┌──────────────────────┬────────────────────────┐
//! │ Length N             │ Payload                │
//! │ 4 bytes, uint32 BE   │ N bytes                │
//! └──────────────────────┴────────────────────────┘
//! ```
//!
//! Client → server payloads are compressed images, server → client payloads
//! are UTF-8 JSON. A single `read` on a socket may return fewer bytes than
//! requested, so every read here goes through [`read_full`].

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ConnectionError, Result};

/// Length header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Default upper bound for an incoming frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN]> {
    let len = u32::try_from(len).map_err(|_| ConnectionError::PayloadTooLarge(len))?;
    Ok(len.to_be_bytes())
}

pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Fills `buf` completely, looping over short reads.
///
/// End of stream before `buf` is full is a framing violation.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let expected = buf.len();
    let mut filled = 0;
    while filled < expected {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ConnectionError::ShortRead {
                expected,
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Writes header and payload, then flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, consuming exactly `HEADER_LEN + N` bytes from `reader`.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_full(reader, &mut header).await?;
    let len = decode_header(header);
    if len > max_len {
        return Err(ConnectionError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    read_full(reader, &mut payload).await?;
    Ok(Bytes::from(payload))
}

#[cfg(test)]
#[path = "framing_test.rs"]
mod framing_test;
