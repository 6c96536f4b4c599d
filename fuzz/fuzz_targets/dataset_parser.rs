//! Fuzz target for dataset parsing
//!
//! Feeds arbitrary bytes to every dataset decoder the session reads from a
//! device.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mtp_core::{DeviceInfo, DevicePropertyDesc, ObjectInfo, ObjectPropertyDesc, StorageInfo};

fuzz_target!(|data: &[u8]| {
    let _ = DeviceInfo::decode(data);
    let _ = StorageInfo::decode(data);
    let _ = DevicePropertyDesc::decode(data);
    let _ = ObjectPropertyDesc::decode(data);

    // A decoded ObjectInfo must encode again
    if let Ok(info) = ObjectInfo::decode(data) {
        let _ = info.encode();
    }
});
