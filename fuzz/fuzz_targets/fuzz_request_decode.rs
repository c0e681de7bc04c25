#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_master::{DeviceLimits, Request};

fuzz_target!(|data: &[u8]| {
    // Decoding checks layout only; encoding also applies count limits
    if let Ok(request) = Request::decode(data) {
        if let Ok(pdu) = request.encode(&DeviceLimits::default()) {
            assert_eq!(pdu.as_slice(), data);
        }
    }
});
