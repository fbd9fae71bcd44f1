//! Message framing over the secured byte stream.
//!
//! Packet encryption, padding and MAC are the transport provider's concern.
//! What reaches the engine is an ordered byte stream, so every message
//! payload is delimited with a length prefix:
//!
//! ```text
//! uint32    payload_length
//! byte[n]   payload (first byte is the SSH_MSG_* number)
//! ```
//!
//! Decoding is incremental: bytes are appended to a buffer as they arrive and
//! [`FrameCodec::decode`] yields complete payloads once available.
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tether_proto::ssh::frame::FrameCodec;
//!
//! let codec = FrameCodec::default();
//! let mut wire = BytesMut::new();
//! codec.encode(&[94, 0, 0, 0, 1], &mut wire).unwrap();
//!
//! let payload = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(&payload[..], &[94, 0, 0, 0, 1]);
//! assert!(wire.is_empty());
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tether_platform::{TetherError, TetherResult};

/// Largest payload accepted by default (256 KiB of data plus headers).
pub const MAX_FRAME_SIZE: usize = 256 * 1024 + 1024;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Length-prefixed message codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Creates a codec that rejects payloads larger than `max_frame`.
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    /// Returns the maximum payload size.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Appends one framed payload to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Protocol`] if the payload is empty or too large.
    pub fn encode(&self, payload: &[u8], out: &mut BytesMut) -> TetherResult<()> {
        if payload.is_empty() {
            return Err(TetherError::Protocol("Cannot frame an empty message".to_string()));
        }
        if payload.len() > self.max_frame {
            return Err(TetherError::Protocol(format!(
                "Message too large: {} bytes (max {})",
                payload.len(),
                self.max_frame
            )));
        }

        out.reserve(FRAME_HEADER_LEN + payload.len());
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        Ok(())
    }

    /// Removes and returns the next complete payload from `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A length prefix of zero or
    /// above the limit is a protocol error; the buffer is left untouched so the
    /// session can report it and stop reading.
    pub fn decode(&self, buf: &mut BytesMut) -> TetherResult<Option<Bytes>> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length == 0 {
            return Err(TetherError::Protocol("Zero-length frame".to_string()));
        }
        if length > self.max_frame {
            return Err(TetherError::Protocol(format!(
                "Frame length {} exceeds maximum {}",
                length, self.max_frame
            )));
        }

        if buf.len() < FRAME_HEADER_LEN + length {
            buf.reserve(FRAME_HEADER_LEN + length - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        Ok(Some(buf.split_to(length).freeze()))
    }
}
