//! Fuzz target: JSON dispatch bodies
//!
//! Arbitrary bytes handed to the serializer either decode into a call or
//! produce an error; a decoded call must survive a re-encode.
//!
//! cargo fuzz run fuzz_request_body

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagmux::serializer::JsonSerializerSink;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = JsonSerializerSink::decode_request(data) {
        let bytes = JsonSerializerSink::encode_request(&request).expect("decoded calls re-encode");
        let again = JsonSerializerSink::decode_request(&bytes).expect("re-encoded calls decode");
        assert_eq!(again.method, request.method);
        assert_eq!(again.properties, request.properties);
    }
});
