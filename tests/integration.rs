//! Integration tests for the codec, metadata, and registry layers.
//!
//! These tests drive the crate the way a transport does: the registry is
//! built and frozen, inbound bytes flow through a `MessageDecoder`
//! configured from the resolved route, and responses flow back out through
//! a `MessageEncoder`.

use bytes::Bytes;
use grpc::{
    Code, MarshalFn, Metadata, MessageDecoder, MessageEncoder, Method, Registry, Service, Status,
    Timeout, UnmarshalFn, encode_message,
};
use std::sync::Arc;

/// A request handler as the test transport models it: bytes in, bytes out.
type Handler = fn(&[u8]) -> Vec<u8>;

fn reverse_marshal() -> MarshalFn {
    Arc::new(|message| {
        let mut payload = message.to_vec();
        payload.reverse();
        Ok(Bytes::from(payload))
    })
}

fn reverse_unmarshal() -> UnmarshalFn {
    Arc::new(|payload| {
        let mut message = payload.to_vec();
        message.reverse();
        Ok(Bytes::from(message))
    })
}

fn echo(message: &[u8]) -> Vec<u8> {
    message.to_vec()
}

fn shout(message: &[u8]) -> Vec<u8> {
    message.to_ascii_uppercase()
}

/// Build and freeze the registry the way a server main would.
fn serve_registry() -> grpc::FrozenRegistry<Handler> {
    let services = vec![
        Service::new("basic", vec![Method::new("echo"), Method::new("shout")]).unwrap(),
        Service::new(
            "test",
            vec![
                Method::new("do_reverse")
                    .marshal(reverse_marshal())
                    .unmarshal(reverse_unmarshal()),
            ],
        )
        .unwrap(),
    ];

    let mut registry = Registry::with_services(services).unwrap();
    registry.register("/basic/echo", echo as Handler).unwrap();
    registry.register("/basic/shout", shout as Handler).unwrap();
    registry
        .register("/test/do_reverse", echo as Handler)
        .unwrap();
    registry.freeze().unwrap()
}

/// Run one unary exchange through the registry-configured codecs.
///
/// Returns the response message as the client-side decoder emits it.
fn roundtrip(registry: &grpc::FrozenRegistry<Handler>, route: &str, request: &[u8]) -> Bytes {
    let resolved = registry.resolve(route).unwrap();

    // Server side: decode the inbound frame with the route's unmarshaller.
    let mut decoder = MessageDecoder::new();
    decoder.set_unmarshal(resolved.unmarshal.cloned());
    decoder.feed(&encode_message(request));
    let message = decoder.decode().unwrap().unwrap();
    decoder.finish().unwrap();

    let response = (resolved.handler)(&message);

    // Server side: frame the response with the route's marshaller.
    let mut encoder = MessageEncoder::new();
    encoder.set_marshal(resolved.marshal.cloned());
    encoder.push(&response).unwrap();

    // Client side: raw decode of what went on the wire.
    let mut client = MessageDecoder::new();
    client.feed(encoder.pending_send());
    let reply = client.decode().unwrap().unwrap();
    client.finish().unwrap();
    reply
}

// =============================================================================
// Registry-driven dispatch
// =============================================================================

#[test]
fn test_unary_echo_through_registry() {
    let registry = serve_registry();
    let reply = roundtrip(&registry, "/basic/echo", b"hello");
    assert_eq!(&reply[..], b"hello");
}

#[test]
fn test_unary_shout_through_registry() {
    let registry = serve_registry();
    let reply = roundtrip(&registry, "/basic/shout", b"hello");
    assert_eq!(&reply[..], b"HELLO");
}

#[test]
fn test_unary_with_method_codecs() {
    let registry = serve_registry();

    // The request payload is reversed by the unmarshaller before the echo
    // handler sees it, and the echoed reply is reversed again on the way
    // out by the marshaller.
    let reply = roundtrip(&registry, "/test/do_reverse", b"abc");
    assert_eq!(&reply[..], b"abc");
}

#[test]
fn test_unresolved_route_is_unimplemented() {
    let registry = serve_registry();

    let status = match registry.resolve("/basic/missing") {
        Some(_) => Status::ok(),
        None => Status::unimplemented("no handler for /basic/missing"),
    };
    assert_eq!(status.code(), Code::Unimplemented);
}

#[test]
fn test_registry_must_be_complete_before_serving() {
    let services = vec![Service::new("basic", vec![Method::new("echo")]).unwrap()];
    let registry: Registry<Handler> = Registry::with_services(services).unwrap();

    assert!(registry.freeze().is_err());
}

// =============================================================================
// Streaming vs one-shot equivalence
// =============================================================================

fn decode_all(decoder: &mut MessageDecoder) -> Vec<Bytes> {
    let mut messages = Vec::new();
    while let Some(message) = decoder.decode().unwrap() {
        messages.push(message);
    }
    messages
}

#[test]
fn test_fragmentation_equivalence() {
    let messages: &[&[u8]] = &[b"first", b"", b"second message", b"x"];

    let mut wire = Vec::new();
    for message in messages {
        wire.extend_from_slice(&encode_message(message));
    }

    // One chunk
    let mut decoder = MessageDecoder::new();
    decoder.feed(&wire);
    let one_chunk = decode_all(&mut decoder);
    decoder.finish().unwrap();

    // Frame-aligned chunks
    let mut decoder = MessageDecoder::new();
    let mut aligned = Vec::new();
    for message in messages {
        decoder.feed(&encode_message(message));
        aligned.extend(decode_all(&mut decoder));
    }
    decoder.finish().unwrap();

    // Byte-wise fragmentation
    let mut decoder = MessageDecoder::new();
    let mut bytewise = Vec::new();
    for byte in &wire {
        decoder.feed(&[*byte]);
        bytewise.extend(decode_all(&mut decoder));
    }
    decoder.finish().unwrap();

    let expected: Vec<Bytes> = messages.iter().map(|m| Bytes::copy_from_slice(m)).collect();
    assert_eq!(one_chunk, expected);
    assert_eq!(aligned, expected);
    assert_eq!(bytewise, expected);
}

#[test]
fn test_encoder_to_decoder_pipe() {
    let mut encoder = MessageEncoder::new();
    encoder.push(b"one").unwrap();
    encoder.push(b"two").unwrap();
    encoder.push(b"three").unwrap();

    // Drain the encoder in small slices, as a transport with a tiny write
    // window would.
    let mut decoder = MessageDecoder::new();
    while encoder.has_pending_send() {
        let n = encoder.pending_send().len().min(4);
        decoder.feed(&encoder.pending_send()[..n]);
        encoder.advance_send(n);
    }

    let messages = decode_all(&mut decoder);
    decoder.finish().unwrap();

    assert_eq!(messages.len(), 3);
    assert_eq!(&messages[0][..], b"one");
    assert_eq!(&messages[1][..], b"two");
    assert_eq!(&messages[2][..], b"three");
}

#[test]
fn test_truncated_stream_fails_flush() {
    let wire = encode_message(b"cut off");

    let mut decoder = MessageDecoder::new();
    decoder.feed(&wire[..wire.len() - 2]);
    assert!(decoder.decode().unwrap().is_none());

    let err = decoder.finish().unwrap_err();
    let status = Status::from(err);
    assert_eq!(status.code(), Code::DataLoss);
}

// =============================================================================
// Metadata on the wire
// =============================================================================

#[test]
fn test_request_metadata_with_deadline() {
    let mut metadata = Metadata::new();
    metadata.insert("x-request-id", "12345");
    metadata.insert_bin("x-trace", Bytes::from_static(&[9, 8, 7]));
    metadata.insert(
        "grpc-timeout",
        Timeout::from_millis(250).encode().unwrap(),
    );

    let wire = metadata.into_wire();

    // Everything on the wire is ASCII
    assert!(wire.iter().all(|(k, v)| k.is_ascii() && v.is_ascii()));

    // The receiving side restores the entries and the deadline
    let received = Metadata::from_wire(wire).unwrap();
    assert_eq!(received.get("x-request-id"), Some("12345"));
    assert_eq!(
        received.get_bin("x-trace"),
        Some(&Bytes::from_static(&[9, 8, 7]))
    );

    let timeout = Timeout::parse(received.get("grpc-timeout").unwrap()).unwrap();
    assert_eq!(timeout.as_micros(), 250_000);
}

#[test]
fn test_malformed_timeout_is_protocol_error() {
    let err = Timeout::parse("25q").unwrap_err();
    let status = Status::from(err);
    assert_eq!(status.code(), Code::OutOfRange);
}
