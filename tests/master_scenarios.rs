//! End-to-end transactions between the master and a simulated slave bus
//!
//! The port here is assembled from the public lock-free building blocks; the
//! simulated slaves decode each transmitted frame and answer it byte by byte.

use std::collections::{HashMap, VecDeque};

use voltage_modbus_master::crc::{crc16, is_valid};
use voltage_modbus_master::{
    CriticalSection, ErrorEvent, EventQueue, FlagEventQueue, FlagSection, MasterConfig,
    ModbusException, ModbusMaster, ModbusError, RegisterStore, Request, Resource, Serial,
    SerialMode, StoreConfig, TimerConfig, TimerMode, Timers, TokenResource, BROADCAST_ADDRESS,
};

// ============================================================================
// Port
// ============================================================================

#[derive(Default)]
struct BusPort {
    events: FlagEventQueue,
    token: TokenResource,
    section: FlagSection,
    mode: Option<SerialMode>,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    timer: Option<TimerMode>,
}

impl EventQueue for BusPort {
    fn event_init(&mut self) -> bool {
        self.events.clear();
        true
    }

    fn post(&mut self, event: voltage_modbus_master::Event) -> bool {
        self.events.post(event)
    }

    fn get(&mut self) -> Option<voltage_modbus_master::Event> {
        self.events.get()
    }
}

impl Resource for BusPort {
    fn resource_init(&mut self) {
        self.token.release();
    }

    fn take(&mut self) -> bool {
        self.token.take()
    }

    fn release(&mut self) {
        self.token.release();
    }
}

impl Serial for BusPort {
    fn serial_init(&mut self) -> bool {
        true
    }

    fn set_mode(&mut self, mode: SerialMode) {
        self.mode = Some(mode);
    }

    fn get_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn put_byte(&mut self, byte: u8) -> bool {
        self.tx.push(byte);
        true
    }
}

impl Timers for BusPort {
    fn timers_init(&mut self, config: &TimerConfig) -> bool {
        config.validate().is_ok()
    }

    fn enable(&mut self, mode: TimerMode) {
        self.timer = Some(mode);
    }

    fn disable(&mut self) {
        self.timer = None;
    }
}

impl CriticalSection for BusPort {
    fn enter(&mut self) {
        self.section.enter();
    }

    fn exit(&mut self) {
        self.section.exit();
    }
}

// ============================================================================
// Simulated slaves
// ============================================================================

const SLAVE_REGISTERS: u16 = 128;

#[derive(Default)]
struct SimSlaves {
    holding: HashMap<(u8, u16), u16>,
    coils: HashMap<(u8, u16), bool>,
    silent: bool,
    corrupt: bool,
    /// Every frame seen on the bus
    frames: Vec<Vec<u8>>,
}

impl SimSlaves {
    fn answer(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        self.frames.push(frame.to_vec());
        assert!(is_valid(frame), "master sent a bad frame: {:02X?}", frame);

        let address = frame[0];
        let request = Request::decode(&frame[1..frame.len() - 2]).expect("decodable request");

        if address == BROADCAST_ADDRESS {
            for slave in 1..=16 {
                self.execute(slave, &request);
            }
            return None;
        }
        if self.silent {
            return None;
        }

        let pdu = self.execute(address, &request);
        let mut response = vec![address];
        response.extend_from_slice(&pdu);
        response.extend_from_slice(&crc16(&response).to_le_bytes());
        if self.corrupt {
            let last = response.len() - 1;
            response[last] ^= 0x01;
        }
        Some(response)
    }

    fn execute(&mut self, slave: u8, request: &Request) -> Vec<u8> {
        let fc = request.function().to_u8();
        let in_range = |address: u16, count: u16| address as u32 + count as u32 <= SLAVE_REGISTERS as u32;

        match request {
            Request::ReadHoldingRegisters { address, count } => {
                if !in_range(*address, *count) {
                    return vec![fc | 0x80, 0x02];
                }
                let mut pdu = vec![fc, (*count * 2) as u8];
                for offset in 0..*count {
                    let value = self.holding.get(&(slave, address + offset)).copied().unwrap_or(0);
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
                pdu
            }
            Request::ReadCoils { address, count } => {
                let mut bits = vec![0u8; (*count as usize).div_ceil(8)];
                for offset in 0..*count {
                    if self.coils.get(&(slave, address + offset)).copied().unwrap_or(false) {
                        bits[offset as usize / 8] |= 1 << (offset % 8);
                    }
                }
                let mut pdu = vec![fc, bits.len() as u8];
                pdu.extend_from_slice(&bits);
                pdu
            }
            Request::WriteSingleRegister { address, value } => {
                self.holding.insert((slave, *address), *value);
                let mut pdu = vec![fc];
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
                pdu
            }
            Request::WriteSingleCoil { address, value } => {
                self.coils.insert((slave, *address), *value == 0xFF00);
                let mut pdu = vec![fc];
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
                pdu
            }
            Request::WriteMultipleRegisters { address, values } => {
                for (offset, value) in values.iter().enumerate() {
                    self.holding.insert((slave, address + offset as u16), *value);
                }
                let mut pdu = vec![fc];
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
                pdu
            }
            Request::WriteMultipleCoils {
                address,
                count,
                values,
            } => {
                for offset in 0..*count {
                    let on = values[offset as usize / 8] & (1 << (offset % 8)) != 0;
                    self.coils.insert((slave, address + offset), on);
                }
                let mut pdu = vec![fc];
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&count.to_be_bytes());
                pdu
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                values,
            } => {
                for (offset, value) in values.iter().enumerate() {
                    self.holding.insert((slave, write_address + offset as u16), *value);
                }
                let mut pdu = vec![fc, (*read_count * 2) as u8];
                for offset in 0..*read_count {
                    let value = self
                        .holding
                        .get(&(slave, read_address + offset))
                        .copied()
                        .unwrap_or(0);
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
                pdu
            }
            Request::ReportSlaveId => vec![fc, 0x03, slave, 0xFF, 0x42],
            _ => vec![fc | 0x80, 0x01],
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Bus {
    master: ModbusMaster<BusPort, RegisterStore>,
    slaves: SimSlaves,
}

impl Bus {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let store = RegisterStore::new(StoreConfig::default().with_holding_registers(0, 200));
        let mut master = ModbusMaster::new(MasterConfig::default(), BusPort::default(), store);
        master.init().unwrap();
        master.enable().unwrap();
        master.on_timer_expired();

        let mut bus = Self {
            master,
            slaves: SimSlaves::default(),
        };
        bus.run();
        bus
    }

    /// Run the exchange to completion
    fn run(&mut self) {
        for _ in 0..16 {
            while self.master.main_function().is_some() {}

            if self.master.port().mode != Some(SerialMode::Tx) {
                return;
            }
            while self.master.port().mode == Some(SerialMode::Tx) {
                self.master.on_transmitter_empty();
            }
            let frame = std::mem::take(&mut self.master.port_mut().tx);

            if let Some(response) = self.slaves.answer(&frame) {
                self.master.port_mut().rx.extend(response.iter().copied());
                for _ in 0..response.len() {
                    self.master.on_byte_received();
                }
                assert_eq!(self.master.port().timer, Some(TimerMode::T35));
            }
            // End of frame, respond timeout or broadcast turnaround
            self.master.on_timer_expired();
        }
        panic!("exchange did not settle");
    }

    fn idle(&self) -> bool {
        !self.master.port().token.is_held()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn read_holding_registers() {
    let mut bus = Bus::new();
    bus.slaves.holding.insert((1, 100), 10);
    bus.slaves.holding.insert((1, 101), 11);

    bus.master.request_read_holding_registers(1, 100, 2).unwrap();
    bus.run();

    assert_eq!(
        bus.slaves.frames[0][..6],
        [0x01, 0x03, 0x00, 0x64, 0x00, 0x02]
    );
    assert_eq!(bus.master.store().holding(1, 100).unwrap(), 10);
    assert_eq!(bus.master.store().holding(1, 101).unwrap(), 11);
    assert_eq!(bus.master.last_error(), None);
    assert!(bus.idle());
}

#[test]
fn write_then_read_back() {
    let mut bus = Bus::new();
    bus.master.request_write_holding_register(2, 5, 0xABCD).unwrap();
    bus.run();
    assert_eq!(bus.slaves.holding[&(2, 5)], 0xABCD);
    assert_eq!(bus.master.store().holding(2, 5).unwrap(), 0xABCD);

    bus.master
        .request_write_multiple_holding_registers(2, 10, &[1, 2, 3])
        .unwrap();
    bus.run();
    assert_eq!(bus.master.store().holding(2, 12).unwrap(), 3);

    *bus.master.store_mut() = RegisterStore::new(StoreConfig::default());
    bus.master.request_read_holding_registers(2, 10, 3).unwrap();
    bus.run();
    assert_eq!(bus.master.store().holding(2, 10).unwrap(), 1);
    assert_eq!(bus.master.store().holding(2, 11).unwrap(), 2);
    assert_eq!(bus.master.stats().executed, 3);
}

#[test]
fn coils_round_trip() {
    let mut bus = Bus::new();
    bus.master
        .request_write_multiple_coils(3, 4, 10, &[0b1010_0101, 0b0000_0011])
        .unwrap();
    bus.run();
    assert!(bus.master.store().coil(3, 4).unwrap());
    assert!(!bus.master.store().coil(3, 5).unwrap());
    assert!(bus.master.store().coil(3, 13).unwrap());

    bus.master.request_write_single_coil(3, 5, 0xFF00).unwrap();
    bus.run();
    assert!(bus.slaves.coils[&(3, 5)]);

    bus.master.request_read_coils(3, 0, 16).unwrap();
    bus.run();
    assert!(bus.master.store().coil(3, 5).unwrap());
    assert!(!bus.master.store().coil(3, 0).unwrap());
    assert_eq!(bus.master.last_error(), None);
}

#[test]
fn read_write_multiple_registers() {
    let mut bus = Bus::new();
    bus.slaves.holding.insert((4, 0), 0x0102);
    bus.master
        .request_read_write_multiple_holding_registers(4, 0, 2, 1, &[0x0A0B])
        .unwrap();
    bus.run();

    assert_eq!(bus.master.store().holding(4, 0).unwrap(), 0x0102);
    assert_eq!(bus.master.store().holding(4, 1).unwrap(), 0x0A0B);
}

#[test]
fn slave_exception() {
    let mut bus = Bus::new();
    bus.master.request_read_holding_registers(1, 150, 4).unwrap();
    bus.run();

    assert_eq!(bus.master.last_error(), Some(ErrorEvent::ExecuteFunctionError));
    assert_eq!(
        bus.master.last_exception(),
        Some(ModbusException::IllegalDataAddress)
    );
    assert!(bus.idle());
}

#[test]
fn silent_slave_times_out() {
    let mut bus = Bus::new();
    bus.slaves.silent = true;
    bus.master.request_read_coils(9, 0, 8).unwrap();
    bus.run();

    assert_eq!(bus.master.last_error(), Some(ErrorEvent::RespondTimeout));
    assert_eq!(bus.master.stats().respond_timeouts, 1);
    assert!(bus.idle());
}

#[test]
fn corrupted_response_is_discarded() {
    let mut bus = Bus::new();
    bus.slaves.corrupt = true;
    bus.slaves.holding.insert((1, 0), 0x7777);
    bus.master.request_read_holding_registers(1, 0, 1).unwrap();
    bus.run();

    assert_eq!(bus.master.last_error(), Some(ErrorEvent::ReceiveDataError));
    assert_eq!(bus.master.store().holding(1, 0).unwrap(), 0);
    assert!(bus.idle());
}

#[test]
fn broadcast_updates_every_slave() {
    let mut bus = Bus::new();
    bus.master
        .request_write_multiple_holding_registers(BROADCAST_ADDRESS, 20, &[0x55AA])
        .unwrap();
    bus.run();

    for slave in 1..=16 {
        assert_eq!(bus.slaves.holding[&(slave, 20)], 0x55AA);
        assert_eq!(bus.master.store().holding(slave, 20).unwrap(), 0x55AA);
    }
    assert_eq!(bus.master.last_error(), None);
    assert!(bus.idle());
}

#[test]
fn one_transaction_at_a_time() {
    let mut bus = Bus::new();
    bus.master.request_read_coils(1, 0, 8).unwrap();
    assert!(matches!(
        bus.master.request_read_coils(2, 0, 8),
        Err(ModbusError::Busy { .. })
    ));
    bus.run();
    assert!(bus.master.request_read_coils(2, 0, 8).is_ok());
    bus.run();
    assert_eq!(bus.slaves.frames.len(), 2);
}

#[test]
fn report_slave_id() {
    let mut bus = Bus::new();
    bus.master.request_report_slave_id(6).unwrap();
    bus.run();

    let report = bus.master.store().reported_slave_id(6).unwrap();
    assert_eq!(report.id(), 6);
    assert!(report.is_running());
    assert_eq!(report.additional(), &[0x42]);
}
