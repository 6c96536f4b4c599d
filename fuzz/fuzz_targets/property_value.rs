//! Fuzz target for property value decoding

#![no_main]

use libfuzzer_sys::fuzz_target;
use mtp_core::DataType;
use mtp_core::property::{decode, decode_unsigned, encode};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let code = u16::from_le_bytes([data[0], data[1]]);
    let bytes = &data[2..];

    let _ = decode_unsigned(bytes);

    let Ok(datatype) = DataType::from_code(code) else {
        return;
    };
    // Whatever decodes must encode back to a prefix of the input
    if let Ok(value) = decode(datatype, bytes) {
        if let Ok(encoded) = encode(datatype, &value) {
            assert!(encoded.len() <= bytes.len());
        }
    }
});
