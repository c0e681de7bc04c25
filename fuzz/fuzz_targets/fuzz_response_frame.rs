#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_modbus_master::crc::crc16;
use voltage_modbus_master::{MasterConfig, MockPort, ModbusMaster, RegisterStore, SerialMode};

#[derive(Debug, Arbitrary)]
struct Input {
    slave: u8,
    function: u8,
    payload: Vec<u8>,
    fix_crc: bool,
}

fuzz_target!(|input: Input| {
    let mut master = ModbusMaster::new(MasterConfig::default(), MockPort::new(), RegisterStore::default());
    if master.init().is_err() || master.enable().is_err() {
        return;
    }
    master.on_timer_expired();
    while master.main_function().is_some() {}

    let slave = input.slave % 17;
    let submitted = match input.function % 4 {
        0 => master.request_read_holding_registers(slave, 0, 8),
        1 => master.request_read_coils(slave, 0, 16),
        2 => master.request_write_multiple_holding_registers(slave, 4, &[1, 2, 3]),
        _ => master.request_report_slave_id(slave),
    };
    if submitted.is_err() {
        return;
    }
    while master.main_function().is_some() {}
    while master.port().mode == Some(SerialMode::Tx) {
        master.on_transmitter_empty();
    }

    let mut frame = vec![slave];
    frame.extend_from_slice(&input.payload);
    if input.fix_crc {
        frame.extend_from_slice(&crc16(&frame).to_le_bytes());
    }
    master.port_mut().feed(&frame);
    for _ in 0..frame.len() {
        master.on_byte_received();
    }
    master.on_timer_expired();
    while master.main_function().is_some() {}

    // Every path ends the transaction
    assert!(!master.port().token.is_held());
});
