//! grpc - gRPC wire codec and RPC routing.
//!
//! This crate implements the framing layer that sits between user-supplied
//! message marshalling and an HTTP/2 transport:
//!
//! - length-prefixed message framing, one-shot and streaming
//! - metadata encoding: the `-bin` key convention and timeout intervals
//! - the route registry mapping `/service/method` to codecs and handlers
//!
//! # Architecture
//!
//! gRPC messages are framed as:
//! - 1 byte: flags (bit 0 = compressed; this crate only ever writes 0)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload (typically protobuf)
//!
//! Protobuf encoding/decoding enters this crate only as opaque marshal and
//! unmarshal callbacks; HTTP/2 stream multiplexing, TLS, and handler
//! dispatch are left to higher-level crates. A transport drives one
//! [`MessageEncoder`] and one [`MessageDecoder`] per RPC stream, consults
//! the [`FrozenRegistry`] once per inbound request, and answers unresolved
//! routes with [`Status::unimplemented`].

mod frame;
mod metadata;
mod registry;
mod status;
mod stream;

pub use frame::{
    BoxError, CodecError, HEADER_SIZE, MAX_MESSAGE_SIZE, MarshalFn, UnmarshalFn, decode_message,
    decode_message_with, encode_message, encode_message_with,
};
pub use metadata::{
    BIN_SUFFIX, Metadata, MetadataError, Timeout, Value, decode_bin_value, encode_bin_value,
};
pub use registry::{FrozenRegistry, Method, Registry, RegistryError, Route, Service};
pub use status::{Code, Status};
pub use stream::{MessageDecoder, MessageEncoder};
