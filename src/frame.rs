//! gRPC message framing.
//!
//! gRPC messages are length-prefixed with the following format:
//! - 1 byte: flags (bit 0 = compressed; this crate only ever writes 0)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload
//!
//! Conversion between application messages and payload bytes is supplied by
//! the caller as optional marshal/unmarshal callbacks. An absent callback
//! passes bytes through untransformed, which is the raw byte-route case.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Size of the gRPC message header (1 byte flags + 4 bytes length).
pub const HEADER_SIZE: usize = 5;

/// Default maximum message size (4MB, matches the gRPC default).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Error type produced by marshal and unmarshal callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Converts an application message into payload bytes.
pub type MarshalFn = Arc<dyn Fn(&[u8]) -> Result<Bytes, BoxError> + Send + Sync>;

/// Converts payload bytes back into an application message.
pub type UnmarshalFn = Arc<dyn Fn(Bytes) -> Result<Bytes, BoxError> + Send + Sync>;

/// Message framing and codec errors.
#[derive(Debug)]
pub enum CodecError {
    /// Buffer shorter than the 5-byte message header.
    Truncated { len: usize },
    /// Declared payload length disagrees with the bytes present.
    LengthMismatch { declared: usize, actual: usize },
    /// Declared payload length exceeds the configured maximum.
    TooLarge { size: usize, max: usize },
    /// The marshal callback failed.
    Marshal(BoxError),
    /// The unmarshal callback failed.
    Unmarshal(BoxError),
    /// A stream was flushed with a partial frame still buffered.
    TrailingFrame { buffered: usize },
    /// The stream was already terminated by an earlier error.
    Closed,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { len } => {
                write!(f, "buffer of {} bytes is shorter than a message header", len)
            }
            CodecError::LengthMismatch { declared, actual } => {
                write!(f, "header declares {} payload bytes, found {}", declared, actual)
            }
            CodecError::TooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds maximum {}", size, max)
            }
            CodecError::Marshal(e) => write!(f, "marshal failed: {}", e),
            CodecError::Unmarshal(e) => write!(f, "unmarshal failed: {}", e),
            CodecError::TrailingFrame { buffered } => {
                write!(f, "stream ended with {} bytes of a partial frame", buffered)
            }
            CodecError::Closed => write!(f, "codec stream closed by an earlier error"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Marshal(e) | CodecError::Unmarshal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Encode a message into gRPC wire format.
///
/// Returns the payload prefixed with a 5-byte header carrying the identity
/// compression flag.
pub fn encode_message(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());

    // Flags (identity compression)
    buf.put_u8(0);

    // Message length (big-endian)
    buf.put_u32(data.len() as u32);

    // Message data
    buf.put_slice(data);

    buf.freeze()
}

/// Marshal a message and frame the result.
///
/// When a marshal callback is configured it runs first and its output is
/// framed; a callback error aborts the encode with no output and is carried
/// verbatim in [`CodecError::Marshal`].
pub fn encode_message_with(
    marshal: Option<&MarshalFn>,
    message: &[u8],
) -> Result<Bytes, CodecError> {
    match marshal {
        Some(marshal) => {
            let payload = marshal(message).map_err(CodecError::Marshal)?;
            Ok(encode_message(&payload))
        }
        None => Ok(encode_message(message)),
    }
}

/// Decode a single complete frame.
///
/// The buffer must hold exactly one frame. The declared length must match
/// the bytes following the header for every flags value: the length prefix
/// counts payload bytes as they appear on the wire, before any external
/// decompression, so framing is compression-independent. The flags byte is
/// returned uninterpreted.
pub fn decode_message(buf: &[u8]) -> Result<(Bytes, u8), CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated { len: buf.len() });
    }

    let flags = buf[0];
    let declared = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let actual = buf.len() - HEADER_SIZE;

    if declared != actual {
        return Err(CodecError::LengthMismatch { declared, actual });
    }

    Ok((Bytes::copy_from_slice(&buf[HEADER_SIZE..]), flags))
}

/// Decode a single complete frame and unmarshal its payload.
///
/// Unmarshal callback errors are carried verbatim in
/// [`CodecError::Unmarshal`].
pub fn decode_message_with(
    unmarshal: Option<&UnmarshalFn>,
    buf: &[u8],
) -> Result<Bytes, CodecError> {
    let (payload, _flags) = decode_message(buf)?;
    match unmarshal {
        Some(unmarshal) => unmarshal(payload).map_err(CodecError::Unmarshal),
        None => Ok(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverse_marshal() -> MarshalFn {
        Arc::new(|message| {
            let mut payload = message.to_vec();
            payload.reverse();
            Ok(Bytes::from(payload))
        })
    }

    #[test]
    fn test_encode_empty_message() {
        let encoded = encode_message(&[]);
        assert_eq!(&encoded[..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_message() {
        let encoded = encode_message(&[1, 2, 3]);
        assert_eq!(&encoded[..], &[0, 0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_encode_large_length_field() {
        let data = vec![0xab; 300];
        let encoded = encode_message(&data);
        assert_eq!(encoded[0], 0);
        assert_eq!(
            u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]),
            300
        );
        assert_eq!(&encoded[HEADER_SIZE..], &data[..]);
    }

    #[test]
    fn test_decode_empty_message() {
        let (payload, flags) = decode_message(&[0, 0, 0, 0, 0]).unwrap();
        assert!(payload.is_empty());
        assert_eq!(flags, 0);
    }

    #[test]
    fn test_decode_roundtrip() {
        let original = b"Hello, gRPC!";
        let encoded = encode_message(original);
        let (decoded, flags) = decode_message(&encoded).unwrap();
        assert_eq!(&decoded[..], original);
        assert_eq!(flags, 0);
    }

    #[test]
    fn test_decode_too_short() {
        for len in 0..HEADER_SIZE {
            let buf = vec![0u8; len];
            match decode_message(&buf) {
                Err(CodecError::Truncated { len: reported }) => assert_eq!(reported, len),
                other => panic!("expected Truncated, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_length_mismatch_short_payload() {
        // Declares 3 bytes, carries 2
        let buf = [0, 0, 0, 0, 3, 0x41, 0x42];
        match decode_message(&buf) {
            Err(CodecError::LengthMismatch { declared, actual }) => {
                assert_eq!(declared, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_length_mismatch_long_payload() {
        // Declares 1 byte, carries 2
        let buf = [0, 0, 0, 0, 1, 0x41, 0x42];
        assert!(matches!(
            decode_message(&buf),
            Err(CodecError::LengthMismatch {
                declared: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_decode_length_checked_for_nonzero_flags() {
        // Length verification is independent of the compression flag.
        let buf = [1, 0, 0, 0, 3, 0x41, 0x42];
        assert!(matches!(
            decode_message(&buf),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_flags_passthrough() {
        let buf = [0x81, 0, 0, 0, 1, 0x41];
        let (payload, flags) = decode_message(&buf).unwrap();
        assert_eq!(&payload[..], b"A");
        assert_eq!(flags, 0x81);
    }

    #[test]
    fn test_encode_with_marshal() {
        let marshal = reverse_marshal();
        let encoded = encode_message_with(Some(&marshal), b"abc").unwrap();
        assert_eq!(&encoded[..], &[0, 0, 0, 0, 3, b'c', b'b', b'a']);
    }

    #[test]
    fn test_encode_without_marshal_passes_through() {
        let encoded = encode_message_with(None, b"abc").unwrap();
        assert_eq!(&encoded[..], &[0, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_marshal_error() {
        let marshal: MarshalFn = Arc::new(|_| Err("serialization refused".into()));
        match encode_message_with(Some(&marshal), b"abc") {
            Err(CodecError::Marshal(e)) => {
                assert_eq!(e.to_string(), "serialization refused");
            }
            other => panic!("expected Marshal error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_with_unmarshal() {
        let unmarshal: UnmarshalFn = Arc::new(|payload| {
            let mut message = payload.to_vec();
            message.reverse();
            Ok(Bytes::from(message))
        });
        let encoded = encode_message(b"abc");
        let decoded = decode_message_with(Some(&unmarshal), &encoded).unwrap();
        assert_eq!(&decoded[..], b"cba");
    }

    #[test]
    fn test_decode_unmarshal_error() {
        let unmarshal: UnmarshalFn = Arc::new(|_| Err("bad payload".into()));
        let encoded = encode_message(b"abc");
        match decode_message_with(Some(&unmarshal), &encoded) {
            Err(CodecError::Unmarshal(e)) => assert_eq!(e.to_string(), "bad payload"),
            other => panic!("expected Unmarshal error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_without_unmarshal_passes_through() {
        let encoded = encode_message(b"raw");
        let decoded = decode_message_with(None, &encoded).unwrap();
        assert_eq!(&decoded[..], b"raw");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            CodecError::Truncated { len: 2 }.to_string(),
            "buffer of 2 bytes is shorter than a message header"
        );
        assert_eq!(
            CodecError::LengthMismatch {
                declared: 3,
                actual: 1
            }
            .to_string(),
            "header declares 3 payload bytes, found 1"
        );
        assert_eq!(
            CodecError::TrailingFrame { buffered: 4 }.to_string(),
            "stream ended with 4 bytes of a partial frame"
        );
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;
        let err = CodecError::Marshal("inner".into());
        assert_eq!(err.source().unwrap().to_string(), "inner");
        assert!(CodecError::Closed.source().is_none());
    }

    #[test]
    fn test_header_size_constant() {
        assert_eq!(HEADER_SIZE, 5);
    }
}
