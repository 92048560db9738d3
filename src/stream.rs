//! Incremental message framing over a byte stream.
//!
//! [`MessageEncoder`] frames application messages one at a time into a
//! drainable send buffer; [`MessageDecoder`] reassembles messages from
//! chunks split at arbitrary byte boundaries. Each instance belongs to a
//! single RPC stream and is not safe for concurrent use; the transport
//! delivers chunks and messages serially.

use crate::frame::{self, CodecError, HEADER_SIZE, MAX_MESSAGE_SIZE, MarshalFn, UnmarshalFn};

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

/// Streaming encoder for gRPC messages.
///
/// Each pushed message is framed independently and appended to the send
/// buffer, which the transport drains with [`pending_send`] /
/// [`advance_send`]. A marshal failure terminates the stream: the buffer is
/// dropped and later pushes fail with [`CodecError::Closed`].
///
/// [`pending_send`]: MessageEncoder::pending_send
/// [`advance_send`]: MessageEncoder::advance_send
#[derive(Default)]
pub struct MessageEncoder {
    /// Marshal callback applied to each message before framing.
    marshal: Option<MarshalFn>,
    /// Framed bytes not yet handed to the transport.
    buffer: BytesMut,
    /// Set once a marshal error has terminated the stream.
    failed: bool,
}

impl MessageEncoder {
    /// Create an encoder with no marshal callback (raw byte routes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with a marshal callback.
    pub fn with_marshal(marshal: MarshalFn) -> Self {
        Self {
            marshal: Some(marshal),
            buffer: BytesMut::new(),
            failed: false,
        }
    }

    /// Replace the marshal callback on a live stream.
    ///
    /// Messages pushed afterwards use the new callback. Server dispatchers
    /// use this to defer codec selection until the route is known.
    pub fn set_marshal(&mut self, marshal: Option<MarshalFn>) {
        self.marshal = marshal;
    }

    /// Marshal one message and append its frame to the send buffer.
    pub fn push(&mut self, message: &[u8]) -> Result<(), CodecError> {
        if self.failed {
            return Err(CodecError::Closed);
        }

        match frame::encode_message_with(self.marshal.as_ref(), message) {
            Ok(encoded) => {
                self.buffer.extend_from_slice(&encoded);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "message encode stream terminated");
                self.failed = true;
                self.buffer = BytesMut::new();
                Err(e)
            }
        }
    }

    /// Framed bytes ready for the transport.
    pub fn pending_send(&self) -> &[u8] {
        &self.buffer
    }

    /// Mark `n` bytes of the send buffer as handed off.
    pub fn advance_send(&mut self, n: usize) {
        self.buffer.advance(n);
    }

    /// Check if there are framed bytes waiting.
    pub fn has_pending_send(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Streaming decoder for gRPC messages.
///
/// Feed chunks as they arrive and call [`decode`] until it reports that
/// more input is needed; a single chunk may carry several frames. At end of
/// stream, [`finish`] verifies that no partial frame was left behind.
///
/// [`decode`]: MessageDecoder::decode
/// [`finish`]: MessageDecoder::finish
pub struct MessageDecoder {
    /// Reassembly buffer holding incomplete frame data.
    buffer: BytesMut,
    /// Unmarshal callback applied to each payload.
    unmarshal: Option<UnmarshalFn>,
    /// Frames declaring a larger payload are rejected.
    max_message_size: usize,
    /// Set once a decode error has terminated the stream.
    failed: bool,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    /// Create a decoder with no unmarshal callback (raw byte routes).
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            unmarshal: None,
            max_message_size: MAX_MESSAGE_SIZE,
            failed: false,
        }
    }

    /// Create a decoder with an unmarshal callback.
    pub fn with_unmarshal(unmarshal: UnmarshalFn) -> Self {
        let mut decoder = Self::new();
        decoder.unmarshal = Some(unmarshal);
        decoder
    }

    /// Override the maximum accepted message size.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Replace the unmarshal callback on a live stream.
    ///
    /// Messages decoded afterwards use the new callback. Server dispatchers
    /// use this to defer codec selection until the route is known.
    pub fn set_unmarshal(&mut self, unmarshal: Option<UnmarshalFn>) {
        self.unmarshal = unmarshal;
    }

    /// Feed a chunk received from the transport.
    ///
    /// Chunks arriving after a decode error are dropped.
    pub fn feed(&mut self, data: &[u8]) {
        if self.failed {
            return;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next message.
    ///
    /// Returns `Ok(Some(message))` when a complete frame was buffered and
    /// `Ok(None)` when more input is needed; a zero-length payload emits an
    /// empty message, which is distinct from needing input. After an error
    /// the decoder emits nothing further.
    pub fn decode(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.failed || self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if declared > self.max_message_size {
            return Err(self.terminate(CodecError::TooLarge {
                size: declared,
                max: self.max_message_size,
            }));
        }

        if self.buffer.len() < HEADER_SIZE + declared {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(declared).freeze();

        match self.unmarshal.clone() {
            Some(unmarshal) => match unmarshal(payload) {
                Ok(message) => Ok(Some(message)),
                Err(e) => Err(self.terminate(CodecError::Unmarshal(e))),
            },
            None => Ok(Some(payload)),
        }
    }

    /// Flush check at end of stream.
    ///
    /// An empty residual buffer flushes cleanly; anything else means the
    /// peer stopped mid-frame. Call [`decode`] until `Ok(None)` first.
    ///
    /// [`decode`]: MessageDecoder::decode
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.failed || self.buffer.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingFrame {
                buffered: self.buffer.len(),
            })
        }
    }

    /// Check if there's any buffered data.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Get the amount of buffered data.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn terminate(&mut self, error: CodecError) -> CodecError {
        debug!(error = %error, "message decode stream terminated");
        self.failed = true;
        self.buffer = BytesMut::new();
        error
    }
}
