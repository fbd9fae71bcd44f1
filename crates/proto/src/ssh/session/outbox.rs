//! Outbound frame queue.
//!
//! Every message the session produces is framed into one byte buffer that is
//! drained into the secure stream as it accepts bytes. Control messages are
//! always queued; channel data checks [`Outbox::room`] first so the buffer
//! stays near its bound.

use crate::ssh::connection::ConnectionMessage;
use crate::ssh::frame::{FrameCodec, FRAME_HEADER_LEN};
use bytes::{Buf, BytesMut};
use tether_platform::{SecureStream, TetherError, TetherResult};
use tracing::{debug, trace};

#[derive(Debug)]
pub(crate) struct Outbox {
    codec: FrameCodec,
    buf: BytesMut,
    max: usize,
}

impl Outbox {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            codec: FrameCodec::default(),
            buf: BytesMut::new(),
            max,
        }
    }

    /// Frames and queues one message payload.
    pub(crate) fn push(&mut self, payload: &[u8]) -> TetherResult<()> {
        self.codec.encode(payload, &mut self.buf)
    }

    pub(crate) fn send(&mut self, message: &ConnectionMessage) -> TetherResult<()> {
        debug!(
            "Queue {} (channel {:?})",
            message.message_type(),
            message.recipient_channel()
        );
        self.push(&message.to_bytes())
    }

    /// Bytes that may still be queued before the bound is reached.
    pub(crate) fn room(&self) -> usize {
        self.max.saturating_sub(self.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }

    /// Writes queued bytes until the stream stops accepting them.
    ///
    /// Returns the number of bytes written; a would-block from the stream is
    /// not an error here.
    pub(crate) fn flush(&mut self, stream: &mut dyn SecureStream) -> TetherResult<usize> {
        let mut written = 0;
        while !self.buf.is_empty() {
            match stream.send(&self.buf) {
                Ok(0) => {
                    return Err(TetherError::Disconnected(
                        "Stream accepted no bytes".to_string(),
                    ))
                }
                Ok(n) => {
                    self.buf.advance(n);
                    written += n;
                }
                Err(TetherError::WouldBlock(_)) => break,
                Err(e) => return Err(e),
            }
        }
        if written > 0 {
            trace!("Flushed {} bytes, {} queued", written, self.len());
        }
        Ok(written)
    }
}

/// Framing overhead of one CHANNEL_EXTENDED_DATA message.
pub(crate) const DATA_OVERHEAD: usize = FRAME_HEADER_LEN + 1 + 4 + 4 + 4;
