//! `tokio_util` codec for the length-prefixed framing, used on the serving
//! side where a buffered `Framed` stream is convenient.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ConnectionError;
use crate::framing::{DEFAULT_MAX_FRAME_LEN, HEADER_LEN, encode_header};

#[derive(Debug, Clone)]
pub struct LengthPrefixCodec {
    max_frame_len: u32,
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = Bytes;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ConnectionError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // peek, the header is only consumed once the whole frame is buffered
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header);
        if len > self.max_frame_len {
            return Err(ConnectionError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let total = HEADER_LEN + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len as usize).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ConnectionError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = if src.len() < HEADER_LEN {
                    HEADER_LEN
                } else {
                    let mut header = [0u8; HEADER_LEN];
                    header.copy_from_slice(&src[..HEADER_LEN]);
                    HEADER_LEN + u32::from_be_bytes(header) as usize
                };
                Err(ConnectionError::ShortRead {
                    expected,
                    received: src.len(),
                })
            }
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for LengthPrefixCodec {
    type Error = ConnectionError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ConnectionError> {
        let payload = item.as_ref();
        let header = encode_header(payload.len())?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&header);
        dst.put_slice(payload);
        Ok(())
    }
}
