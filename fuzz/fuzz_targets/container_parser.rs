//! Fuzz target for container parsing
//!
//! Tests that the container parser handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mtp_core::container::{Container, ContainerHeader};

fuzz_target!(|data: &[u8]| {
    // Header of a container that may continue in later buffers
    if let Ok(header) = ContainerHeader::parse(data) {
        let _ = header.payload_len();
    }

    // Complete container; accepted input must re-encode byte for byte
    if let Ok(container) = Container::decode(data) {
        let _ = container.params();
        assert_eq!(container.encode(), data);
    }
});
