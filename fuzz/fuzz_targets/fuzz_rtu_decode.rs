#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_master::{FrameTransport, MockPort, RtuTransport};

fuzz_target!(|data: &[u8]| {
    let mut port = MockPort::new();
    let mut transport = RtuTransport::new(16);
    FrameTransport::<MockPort>::start(&mut transport, &mut port);
    transport.on_timer_expired(&mut port);

    port.feed(data);
    for _ in 0..data.len() {
        transport.on_byte_received(&mut port);
    }
    transport.on_timer_expired(&mut port);

    if let Ok(frame) = FrameTransport::<MockPort>::receive(&transport) {
        assert_eq!(frame.pdu.len() + 3, transport.received().len());
    }
});
