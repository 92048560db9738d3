#![no_main]

use grpc::{MessageDecoder, encode_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = MessageDecoder::new();

    // Feed data in chunks to test incremental reassembly
    let chunk_size = if data.len() > 10 { data.len() / 3 } else { 1 };

    for chunk in data.chunks(chunk_size.max(1)) {
        decoder.feed(chunk);

        loop {
            match decoder.decode() {
                Ok(Some(message)) => {
                    // Roundtrip: a decoded message must reframe cleanly
                    let reencoded = encode_message(&message);
                    assert!(reencoded.len() >= 5);
                }
                Ok(None) => {
                    // Need more data
                    break;
                }
                Err(_) => {
                    // After an error the decoder is terminated: it holds no
                    // buffer and emits nothing further
                    assert!(!decoder.has_buffered_data());
                    assert!(matches!(decoder.decode(), Ok(None)));
                    break;
                }
            }
        }
    }

    let _ = decoder.finish();
    let _ = decoder.buffered_len();
});
