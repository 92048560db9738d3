#![no_main]

use grpc::{decode_message, encode_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match decode_message(data) {
        Ok((payload, _flags)) => {
            // A strict decode only succeeds when the declared length matches
            // the buffer exactly, so a reencode must reproduce the payload.
            let reencoded = encode_message(&payload);
            assert!(reencoded.len() >= 5);
            assert_eq!(reencoded.len(), data.len());

            let (redecoded, flags) = decode_message(&reencoded).unwrap();
            assert_eq!(payload, redecoded);
            assert_eq!(flags, 0);
        }
        Err(_) => {
            // Malformed input is expected; it must only ever fail cleanly
        }
    }
});
