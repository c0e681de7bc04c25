//! # Protocol Dispatcher
//!
//! [`ModbusMaster`] owns the framing layer, the shadow register file and the
//! port, and advances one event per [`main_function`](ModbusMaster::main_function)
//! call. No thread is spawned and nothing blocks.
//!
//! ## Lifecycle
//!
//! ```text
//! NotInitialized ──init()──▶ Disabled ◀──enable()/disable()──▶ Enabled
//! ```
//!
//! ## Transaction
//!
//! 1. `request_*` validates, takes the resource token (`Busy` if held), loads
//!    the send buffer and posts `FrameSent`.
//! 2. `FrameSent` starts transmission; the port drives the byte and timer
//!    callbacks from then on.
//! 3. A complete frame from the addressed slave posts `Execute`; the handler
//!    for its function code updates the store and the token is released.
//! 4. Any failure is recorded as an [`ErrorEvent`], `Error` is posted and its
//!    processing releases the token. Nothing is retried here.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut master = ModbusMaster::new(MasterConfig::default(), port, RegisterStore::default());
//! master.init()?;
//! master.enable()?;
//!
//! master.request_read_holding_registers(1, 100, 2)?;
//! loop {
//!     master.main_function();
//!     // port interrupts call master.on_byte_received() etc.
//! }
//! ```

use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::constants::{BROADCAST_ADDRESS, FC_ERROR_MASK, FC_REPORT_SLAVE_ID};
use crate::error::{ModbusError, ModbusResult};
use crate::functions::{handler_for, HandlerContext};
use crate::pdu::{ModbusPdu, Request};
use crate::port::{with_critical, Port};
use crate::protocol::{ErrorEvent, Event, ModbusException, ProtocolState, SlaveId};
use crate::slave_id::SlaveIdBuffer;
use crate::store::{RegisterAccess, RegisterStore};
use crate::transport::{new_transport, FrameSignal, FrameTransport};

/// Transaction counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterStats {
    pub requests_sent: u64,
    pub frames_received: u64,
    pub executed: u64,
    pub respond_timeouts: u64,
    pub receive_errors: u64,
    pub execute_errors: u64,
    pub exceptions: u64,
    pub busy_rejections: u64,
}

/// Modbus master context
pub struct ModbusMaster<P: Port, S: RegisterAccess = RegisterStore> {
    config: MasterConfig,
    port: P,
    store: S,
    transport: Option<Box<dyn FrameTransport<P>>>,
    state: ProtocolState,
    last_error: Option<ErrorEvent>,
    last_exception: Option<ModbusException>,
    slave_id: Option<SlaveIdBuffer>,
    stats: MasterStats,
    /// A request holds the resource token
    outstanding: bool,
}

impl<P: Port, S: RegisterAccess> ModbusMaster<P, S> {
    /// Create an uninitialized master
    pub fn new(config: MasterConfig, port: P, store: S) -> Self {
        Self {
            config,
            port,
            store,
            transport: None,
            state: ProtocolState::NotInitialized,
            last_error: None,
            last_exception: None,
            slave_id: None,
            stats: MasterStats::default(),
            outstanding: false,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate the configuration, build the framing layer and initialize the
    /// port collaborators. Leaves the master `Disabled`.
    pub fn init(&mut self) -> ModbusResult<()> {
        if self.state == ProtocolState::Enabled {
            return Err(ModbusError::illegal_state("init while enabled"));
        }
        self.config.validate()?;
        if self.store.slaves() < self.config.max_slaves {
            return Err(ModbusError::invalid_argument(format!(
                "store holds {} slaves, config addresses {}",
                self.store.slaves(),
                self.config.max_slaves
            )));
        }
        let transport = new_transport::<P>(self.config.mode, self.config.max_slaves)?;

        let timers = self.config.timers;
        let line_ok = with_critical(&mut self.port, |port| {
            port.serial_init() && port.timers_init(&timers)
        });
        if !line_ok {
            return Err(ModbusError::port("serial or timer initialization failed"));
        }
        if !self.port.event_init() {
            return Err(ModbusError::port("event queue initialization failed"));
        }
        self.port.resource_init();
        self.outstanding = false;

        self.transport = Some(transport);
        self.state = ProtocolState::Disabled;
        info!(
            "Modbus master initialized: {:?}, {} slaves",
            self.config.mode, self.config.max_slaves
        );
        Ok(())
    }

    /// Start the framing layer; only valid while `Disabled`
    pub fn enable(&mut self) -> ModbusResult<()> {
        if self.state != ProtocolState::Disabled {
            return Err(ModbusError::illegal_state(format!(
                "enable in state {:?}",
                self.state
            )));
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.start(&mut self.port);
        }
        self.state = ProtocolState::Enabled;
        info!("Modbus master enabled");
        Ok(())
    }

    /// Stop the framing layer
    ///
    /// An outstanding transaction is abandoned: queued events are dropped and
    /// the resource token is released.
    pub fn disable(&mut self) -> ModbusResult<()> {
        match self.state {
            ProtocolState::Enabled => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.stop(&mut self.port);
                }
                if self.outstanding {
                    warn!("Modbus master disabled with a transaction outstanding");
                    self.port.event_init();
                    self.finish();
                }
                self.state = ProtocolState::Disabled;
                info!("Modbus master disabled");
                Ok(())
            }
            ProtocolState::Disabled => Ok(()),
            ProtocolState::NotInitialized => {
                Err(ModbusError::illegal_state("disable before init"))
            }
        }
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Process at most one pending event; returns the event handled
    pub fn main_function(&mut self) -> Option<Event> {
        if self.state != ProtocolState::Enabled {
            return None;
        }
        let event = self.port.get()?;

        match event {
            Event::Ready => debug!("Modbus line ready"),
            Event::FrameReceived => self.on_frame_received(),
            Event::Execute => self.on_execute(),
            Event::FrameSent => self.on_frame_sent(),
            Event::Error => self.on_error(),
        }
        Some(event)
    }

    fn on_frame_received(&mut self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let expected = transport.slave_address();

        match transport.receive().map(|frame| frame.address) {
            Ok(address) if address == expected => {
                self.stats.frames_received += 1;
                self.port.post(Event::Execute);
            }
            Ok(address) => {
                debug!(
                    "frame from slave {} while waiting for slave {}",
                    address, expected
                );
                self.fail(ErrorEvent::ReceiveDataError);
            }
            Err(err) => {
                debug!("frame rejected: {}", err);
                self.fail(ErrorEvent::ReceiveDataError);
            }
        }
    }

    fn on_execute(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let broadcast = transport.is_broadcast();

        // A broadcast has no response; its request stands in for one
        let buffers = if broadcast {
            ModbusPdu::from_slice(transport.send_pdu()).map(|pdu| (pdu.clone(), pdu))
        } else {
            transport.receive().and_then(|frame| {
                Ok((
                    ModbusPdu::from_slice(transport.send_pdu())?,
                    ModbusPdu::from_slice(frame.pdu)?,
                ))
            })
        };
        let (request, response) = match buffers {
            Ok(buffers) => buffers,
            Err(err) => {
                debug!("execute without a usable frame: {}", err);
                self.fail(ErrorEvent::ReceiveDataError);
                return;
            }
        };

        let Some(function_code) = response.function_code() else {
            self.fail(ErrorEvent::ExecuteFunctionError);
            return;
        };

        if function_code & FC_ERROR_MASK != 0 {
            let code = response.exception_code().unwrap_or(0);
            self.last_exception = ModbusException::from_code(code);
            self.stats.exceptions += 1;
            warn!(
                "slave {} answered FC {:02X} with exception {:02X}",
                transport.slave_address(),
                function_code & !FC_ERROR_MASK,
                code
            );
            self.fail(ErrorEvent::ExecuteFunctionError);
            return;
        }

        let Some(handler) = handler_for(function_code) else {
            warn!("no handler for function code {:02X}", function_code);
            self.fail(ErrorEvent::ExecuteFunctionError);
            return;
        };

        let slaves = if broadcast {
            1..=self.config.max_slaves
        } else {
            let slave = transport.slave_address();
            slave..=slave
        };

        let mut outcome = Ok(());
        for slave in slaves {
            transport.set_slave_address(slave);
            let mut ctx = HandlerContext {
                request: request.as_slice(),
                slave,
                broadcast,
                store: &mut self.store,
            };
            if let Err(exception) = handler(&mut ctx, response.as_slice()) {
                debug!("handler for slave {} failed: {}", slave, exception);
                if outcome.is_ok() {
                    outcome = Err(exception);
                }
            }
        }

        match outcome {
            Ok(()) => {
                self.stats.executed += 1;
                self.finish();
            }
            Err(_) => self.fail(ErrorEvent::ExecuteFunctionError),
        }
    }

    fn on_frame_sent(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let address = transport.slave_address();
        let len = transport.send_len();

        match transport.send(&mut self.port, address, len) {
            Ok(()) => self.stats.requests_sent += 1,
            Err(err) => {
                warn!("transmission to slave {} refused: {}", address, err);
                self.fail(ErrorEvent::ReceiveDataError);
            }
        }
    }

    fn on_error(&mut self) {
        match self.last_error {
            Some(error) => warn!("Modbus transaction failed: {}", error),
            None => warn!("Modbus transaction failed"),
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.outstanding = false;
        self.port.release();
    }

    fn fail(&mut self, error: ErrorEvent) {
        match error {
            ErrorEvent::RespondTimeout => self.stats.respond_timeouts += 1,
            ErrorEvent::ReceiveDataError => self.stats.receive_errors += 1,
            ErrorEvent::ExecuteFunctionError => self.stats.execute_errors += 1,
        }
        self.last_error = Some(error);
        self.port.post(Event::Error);
    }

    // ========================================================================
    // Port callbacks
    // ========================================================================

    /// Serial receiver has a byte
    pub fn on_byte_received(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let signal = transport.on_byte_received(&mut self.port);
            self.signal(signal);
        }
    }

    /// Serial transmitter can accept the next byte
    pub fn on_transmitter_empty(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let signal = transport.on_transmitter_empty(&mut self.port);
            self.signal(signal);
        }
    }

    /// The running timer elapsed
    pub fn on_timer_expired(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let signal = transport.on_timer_expired(&mut self.port);
            self.signal(signal);
        }
    }

    fn signal(&mut self, signal: Option<FrameSignal>) {
        match signal {
            Some(FrameSignal::Ready) => {
                self.port.post(Event::Ready);
            }
            Some(FrameSignal::FrameReceived) => {
                self.port.post(Event::FrameReceived);
            }
            Some(FrameSignal::BroadcastComplete) => {
                self.port.post(Event::Execute);
            }
            Some(FrameSignal::Failed(error)) => self.fail(error),
            None => {}
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Queue `request` for `slave` (0 = broadcast)
    ///
    /// Only submission is synchronous; the outcome shows up in the store or
    /// in [`last_error`](Self::last_error) after later `main_function` calls.
    pub fn submit(&mut self, slave: SlaveId, request: &Request) -> ModbusResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ModbusError::illegal_state("request before init"));
        };
        if slave > self.config.max_slaves {
            return Err(ModbusError::invalid_argument(format!(
                "slave {} above {}",
                slave, self.config.max_slaves
            )));
        }
        let pdu = request.encode(&self.config.limits)?;

        if !self.port.take() {
            self.stats.busy_rejections += 1;
            return Err(ModbusError::busy("a transaction is already outstanding"));
        }

        self.outstanding = true;
        transport.set_slave_address(slave);
        transport.send_pdu_mut()[..pdu.len()].copy_from_slice(pdu.as_slice());
        transport.set_send_len(pdu.len());
        self.port.post(Event::FrameSent);

        debug!(
            "queued {} for slave {} (broadcast: {})",
            request.function(),
            slave,
            slave == BROADCAST_ADDRESS
        );
        Ok(())
    }

    /// Read coils (FC 0x01) into the slave's coil table
    pub fn request_read_coils(&mut self, slave: SlaveId, address: u16, count: u16) -> ModbusResult<()> {
        self.submit(slave, &Request::ReadCoils { address, count })
    }

    /// Read discrete inputs (FC 0x02) into the slave's discrete input table
    pub fn request_read_discrete_inputs(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<()> {
        self.submit(slave, &Request::ReadDiscreteInputs { address, count })
    }

    /// Read holding registers (FC 0x03) into the slave's holding table
    pub fn request_read_holding_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<()> {
        self.submit(slave, &Request::ReadHoldingRegisters { address, count })
    }

    /// Read input registers (FC 0x04) into the slave's input table
    pub fn request_read_input_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<()> {
        self.submit(slave, &Request::ReadInputRegisters { address, count })
    }

    /// Write a single coil (FC 0x05)
    ///
    /// `value` is the wire value: `0xFF00` (on) or `0x0000` (off)
    pub fn request_write_single_coil(
        &mut self,
        slave: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        self.submit(slave, &Request::WriteSingleCoil { address, value })
    }

    /// Write a single holding register (FC 0x06)
    pub fn request_write_holding_register(
        &mut self,
        slave: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        self.submit(slave, &Request::WriteSingleRegister { address, value })
    }

    /// Write consecutive coils (FC 0x0F)
    ///
    /// `bits` is LSB-first packed; only the first `ceil(count / 8)` bytes are sent
    pub fn request_write_multiple_coils(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        bits: &[u8],
    ) -> ModbusResult<()> {
        let needed = (count as usize).div_ceil(8);
        if bits.len() < needed {
            return Err(ModbusError::invalid_argument(format!(
                "{} coils need {} bytes, got {}",
                count,
                needed,
                bits.len()
            )));
        }
        self.submit(
            slave,
            &Request::WriteMultipleCoils {
                address,
                count,
                values: bits[..needed].to_vec(),
            },
        )
    }

    /// Write consecutive holding registers (FC 0x10)
    pub fn request_write_multiple_holding_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.submit(
            slave,
            &Request::WriteMultipleRegisters {
                address,
                values: values.to_vec(),
            },
        )
    }

    /// Write then read holding registers in one exchange (FC 0x17)
    pub fn request_read_write_multiple_holding_registers(
        &mut self,
        slave: SlaveId,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.submit(
            slave,
            &Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                values: values.to_vec(),
            },
        )
    }

    /// Ask a slave for its identification (FC 0x11)
    pub fn request_report_slave_id(&mut self, slave: SlaveId) -> ModbusResult<()> {
        self.submit(slave, &Request::ReportSlaveId)
    }

    // ========================================================================
    // Identification
    // ========================================================================

    /// Set the identification this master reports about itself
    pub fn set_slave_id(&mut self, id: u8, running: bool, additional: &[u8]) -> ModbusResult<()> {
        self.slave_id = Some(SlaveIdBuffer::new(id, running, additional)?);
        Ok(())
    }

    /// Write the FC17 response for this master's own identification
    pub fn report_slave_id(&self, pdu: &mut ModbusPdu) -> ModbusResult<()> {
        match &self.slave_id {
            Some(buffer) => buffer.write_response(pdu),
            None => {
                pdu.clear();
                pdu.push(FC_REPORT_SLAVE_ID)
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Context of the most recent `Error` event
    pub fn last_error(&self) -> Option<ErrorEvent> {
        self.last_error
    }

    /// Most recent in-band exception received
    pub fn last_exception(&self) -> Option<ModbusException> {
        self.last_exception
    }

    pub fn stats(&self) -> &MasterStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportMode;
    use crate::constants::COIL_ON;
    use crate::crc::crc16;
    use crate::mock::MockPort;
    use crate::port::{SerialMode, TimerMode};

    type Master = ModbusMaster<MockPort, RegisterStore>;

    fn enabled_master() -> Master {
        let mut master = Master::new(MasterConfig::default(), MockPort::new(), RegisterStore::default());
        master.init().unwrap();
        master.enable().unwrap();
        // Startup silence
        master.on_timer_expired();
        assert_eq!(master.main_function(), Some(Event::Ready));
        master
    }

    fn drain(master: &mut Master) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = master.main_function() {
            events.push(event);
        }
        events
    }

    fn transmit(master: &mut Master) -> Vec<u8> {
        assert_eq!(drain(master), vec![Event::FrameSent]);
        while master.port().mode == Some(SerialMode::Tx) {
            master.on_transmitter_empty();
        }
        master.port_mut().take_tx()
    }

    fn respond(master: &mut Master, frame: &[u8]) {
        let mut bytes = frame.to_vec();
        bytes.extend_from_slice(&crc16(frame).to_le_bytes());
        master.port_mut().feed(&bytes);
        for _ in 0..bytes.len() {
            master.on_byte_received();
        }
        master.on_timer_expired();
    }

    #[test]
    fn test_lifecycle() {
        let mut master = Master::new(MasterConfig::default(), MockPort::new(), RegisterStore::default());
        assert_eq!(master.state(), ProtocolState::NotInitialized);
        assert!(master.enable().is_err());
        assert!(matches!(master.disable(), Err(ModbusError::IllegalState { .. })));
        assert!(master.request_read_coils(1, 0, 1).is_err());

        master.init().unwrap();
        assert_eq!(master.state(), ProtocolState::Disabled);
        assert_eq!(master.port().timer_config, Some(MasterConfig::default().timers));
        assert!(master.disable().is_ok());

        master.enable().unwrap();
        assert_eq!(master.state(), ProtocolState::Enabled);
        assert_eq!(master.port().timer, Some(TimerMode::T35));
        assert!(matches!(master.enable(), Err(ModbusError::IllegalState { .. })));
        assert!(master.init().is_err());

        master.disable().unwrap();
        assert_eq!(master.state(), ProtocolState::Disabled);
        assert_eq!(master.port().timer, None);
    }

    #[test]
    fn test_init_failures() {
        let mut port = MockPort::new();
        port.fail_serial_init = true;
        let mut master = Master::new(MasterConfig::default(), port, RegisterStore::default());
        assert!(matches!(master.init(), Err(ModbusError::Port { .. })));
        assert_eq!(master.state(), ProtocolState::NotInitialized);

        let mut port = MockPort::new();
        port.fail_event_init = true;
        let mut master = Master::new(MasterConfig::default(), port, RegisterStore::default());
        assert!(matches!(master.init(), Err(ModbusError::Port { .. })));

        let config = MasterConfig::default().with_mode(TransportMode::Ascii);
        let mut master = Master::new(config, MockPort::new(), RegisterStore::default());
        assert!(matches!(master.init(), Err(ModbusError::InvalidArgument { .. })));

        let config = MasterConfig::default().with_max_slaves(0);
        let mut master = Master::new(config, MockPort::new(), RegisterStore::default());
        assert!(matches!(master.init(), Err(ModbusError::InvalidArgument { .. })));
    }

    #[test]
    fn test_main_function_idle_when_disabled() {
        let mut master = Master::new(MasterConfig::default(), MockPort::new(), RegisterStore::default());
        master.init().unwrap();
        master.request_read_coils(1, 0, 8).unwrap();
        assert_eq!(master.main_function(), None);
        assert_eq!(master.port().events.len(), 1);
    }

    #[test]
    fn test_read_holding_scenario() {
        let mut master = enabled_master();
        // The default store holds 100 registers; widen it for this scenario
        *master.store_mut() = RegisterStore::new(
            crate::store::StoreConfig::default().with_holding_registers(0, 200),
        );
        master.request_read_holding_registers(1, 100, 2).unwrap();

        let frame = transmit(&mut master);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x64, 0x00, 0x02]);
        assert_eq!(master.port().timer, Some(TimerMode::RespondTimeout));

        respond(&mut master, &[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
        assert_eq!(drain(&mut master), vec![Event::FrameReceived, Event::Execute]);

        assert_eq!(master.store().holding(1, 100).unwrap(), 10);
        assert_eq!(master.store().holding(1, 101).unwrap(), 11);
        assert_eq!(master.stats().executed, 1);
        assert!(!master.port().token.is_held());
        assert_eq!(master.last_error(), None);
    }

    #[test]
    fn test_request_validation_does_not_take_token() {
        let mut master = enabled_master();
        assert!(matches!(
            master.request_read_coils(17, 0, 1),
            Err(ModbusError::InvalidArgument { .. })
        ));
        assert!(matches!(
            master.request_write_single_coil(1, 0, 0x1234),
            Err(ModbusError::InvalidArgument { .. })
        ));
        assert!(matches!(
            master.request_write_multiple_coils(1, 0, 0x07B1, &[0; 247]),
            Err(ModbusError::InvalidArgument { .. })
        ));
        assert!(matches!(
            master.request_write_multiple_coils(1, 0, 9, &[0]),
            Err(ModbusError::InvalidArgument { .. })
        ));
        assert!(!master.port().token.is_held());
        assert!(master.port().events.is_empty());
    }

    #[test]
    fn test_busy_until_error() {
        let mut master = enabled_master();
        master.request_read_coils(2, 0, 8).unwrap();
        assert!(matches!(
            master.request_read_coils(2, 0, 8),
            Err(ModbusError::Busy { .. })
        ));
        assert_eq!(master.stats().busy_rejections, 1);

        transmit(&mut master);
        // No answer
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Error]);
        assert_eq!(master.last_error(), Some(ErrorEvent::RespondTimeout));
        assert_eq!(master.stats().respond_timeouts, 1);

        assert!(master.request_read_coils(2, 0, 8).is_ok());
    }

    #[test]
    fn test_busy_until_execute() {
        let mut master = enabled_master();
        master.request_write_holding_register(3, 7, 0xBEEF).unwrap();
        assert!(master.request_write_holding_register(3, 7, 1).is_err());

        transmit(&mut master);
        respond(&mut master, &[0x03, 0x06, 0x00, 0x07, 0xBE, 0xEF]);
        assert_eq!(drain(&mut master), vec![Event::FrameReceived, Event::Execute]);
        assert_eq!(master.store().holding(3, 7).unwrap(), 0xBEEF);

        assert!(master.request_write_holding_register(3, 7, 1).is_ok());
    }

    #[test]
    fn test_broadcast_fan_out() {
        let mut master = enabled_master();
        master
            .request_write_multiple_holding_registers(BROADCAST_ADDRESS, 4, &[0x1234, 0x5678])
            .unwrap();
        let frame = transmit(&mut master);
        assert_eq!(frame[0], BROADCAST_ADDRESS);
        assert_eq!(master.port().timer, Some(TimerMode::ConvertDelay));

        // Conversion delay elapses: no timeout, the payload is applied everywhere
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Execute]);
        assert_eq!(master.last_error(), None);
        for slave in 1..=16 {
            assert_eq!(master.store().holding(slave, 4).unwrap(), 0x1234, "slave {}", slave);
            assert_eq!(master.store().holding(slave, 5).unwrap(), 0x5678, "slave {}", slave);
        }
        assert!(!master.port().token.is_held());
    }

    #[test]
    fn test_broadcast_single_coil() {
        let mut master = enabled_master();
        master
            .request_write_single_coil(BROADCAST_ADDRESS, 9, COIL_ON)
            .unwrap();
        transmit(&mut master);
        master.on_timer_expired();
        drain(&mut master);
        assert!((1..=16).all(|slave| master.store().coil(slave, 9).unwrap()));
    }

    #[test]
    fn test_broadcast_read_applies_nothing() {
        let mut master = enabled_master();
        master
            .request_read_holding_registers(BROADCAST_ADDRESS, 0, 2)
            .unwrap();
        transmit(&mut master);
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Execute]);
        assert_eq!(master.last_error(), None);
        assert_eq!(master.stats().executed, 1);
    }

    #[test]
    fn test_corrupted_response() {
        let mut master = enabled_master();
        master.request_read_holding_registers(1, 0, 1).unwrap();
        transmit(&mut master);

        master.port_mut().feed(&[0x01, 0x03, 0x02, 0x00, 0x2A, 0x00, 0x00]);
        for _ in 0..7 {
            master.on_byte_received();
        }
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::FrameReceived, Event::Error]);
        assert_eq!(master.last_error(), Some(ErrorEvent::ReceiveDataError));
        assert_eq!(master.store().holding(1, 0).unwrap(), 0);
        assert!(!master.port().token.is_held());
    }

    #[test]
    fn test_response_from_wrong_slave() {
        let mut master = enabled_master();
        master.request_read_holding_registers(1, 0, 1).unwrap();
        transmit(&mut master);
        respond(&mut master, &[0x02, 0x03, 0x02, 0x00, 0x2A]);
        assert_eq!(drain(&mut master), vec![Event::FrameReceived, Event::Error]);
        assert_eq!(master.last_error(), Some(ErrorEvent::ReceiveDataError));
    }

    #[test]
    fn test_exception_response() {
        let mut master = enabled_master();
        master.request_read_input_registers(5, 0, 1).unwrap();
        transmit(&mut master);
        respond(&mut master, &[0x05, 0x84, 0x02]);
        assert_eq!(
            drain(&mut master),
            vec![Event::FrameReceived, Event::Execute, Event::Error]
        );
        assert_eq!(master.last_error(), Some(ErrorEvent::ExecuteFunctionError));
        assert_eq!(
            master.last_exception(),
            Some(ModbusException::IllegalDataAddress)
        );
        assert_eq!(master.stats().exceptions, 1);
    }

    #[test]
    fn test_unknown_function_in_response() {
        let mut master = enabled_master();
        master.request_read_coils(1, 0, 1).unwrap();
        transmit(&mut master);
        respond(&mut master, &[0x01, 0x2B, 0x00]);
        assert_eq!(
            drain(&mut master),
            vec![Event::FrameReceived, Event::Execute, Event::Error]
        );
        assert_eq!(master.last_error(), Some(ErrorEvent::ExecuteFunctionError));
    }

    #[test]
    fn test_handler_rejection() {
        let mut master = enabled_master();
        master.request_read_holding_registers(1, 0, 2).unwrap();
        transmit(&mut master);
        // Byte count for a single register
        respond(&mut master, &[0x01, 0x03, 0x02, 0x00, 0x01]);
        assert_eq!(
            drain(&mut master),
            vec![Event::FrameReceived, Event::Execute, Event::Error]
        );
        assert_eq!(master.last_error(), Some(ErrorEvent::ExecuteFunctionError));
        assert_eq!(master.stats().execute_errors, 1);
    }

    #[test]
    fn test_report_own_slave_id() {
        let mut master = enabled_master();
        let mut pdu = ModbusPdu::new();
        master.report_slave_id(&mut pdu).unwrap();
        assert_eq!(pdu.as_slice(), &[0x11]);

        master.set_slave_id(0x10, true, b"M1").unwrap();
        master.report_slave_id(&mut pdu).unwrap();
        assert_eq!(pdu.as_slice(), &[0x11, 0x10, 0xFF, b'M', b'1']);

        assert!(matches!(
            master.set_slave_id(1, true, &[0; 30]),
            Err(ModbusError::InsufficientResources { .. })
        ));
    }

    #[test]
    fn test_report_slave_id_round_trip() {
        let mut master = enabled_master();
        master.request_report_slave_id(4).unwrap();
        let frame = transmit(&mut master);
        assert_eq!(&frame[..2], &[0x04, 0x11]);
        respond(&mut master, &[0x04, 0x11, 0x02, 0x04, 0x00]);
        drain(&mut master);
        let report = master.store().reported_slave_id(4).unwrap();
        assert_eq!(report.id(), 4);
        assert!(!report.is_running());
    }

    #[test]
    fn test_store_must_cover_slave_range() {
        let config = MasterConfig::default().with_max_slaves(20);
        let mut master = Master::new(config, MockPort::new(), RegisterStore::default());
        assert!(matches!(master.init(), Err(ModbusError::InvalidArgument { .. })));
        assert_eq!(master.state(), ProtocolState::NotInitialized);

        let store = RegisterStore::new(crate::store::StoreConfig::default().with_slaves(20));
        let mut master = Master::new(config, MockPort::new(), store);
        master.init().unwrap();
        master.enable().unwrap();
        master.on_timer_expired();
        drain(&mut master);

        master
            .request_write_holding_register(BROADCAST_ADDRESS, 3, 7)
            .unwrap();
        transmit(&mut master);
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Execute]);
        assert_eq!(master.last_error(), None);
        assert!((1..=20).all(|slave| master.store().holding(slave, 3).unwrap() == 7));
    }

    #[test]
    fn test_disable_abandons_outstanding_transaction() {
        let mut master = enabled_master();
        master.request_read_holding_registers(1, 0, 1).unwrap();
        transmit(&mut master);
        assert!(master.port().token.is_held());

        master.disable().unwrap();
        assert!(!master.port().token.is_held());
        assert!(master.port().events.is_empty());

        master.enable().unwrap();
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Ready]);
        assert!(master.request_read_holding_registers(1, 0, 1).is_ok());
    }

    #[test]
    fn test_disable_drops_unsent_request() {
        let mut master = enabled_master();
        master.request_read_coils(1, 0, 8).unwrap();
        master.disable().unwrap();

        master.enable().unwrap();
        master.on_timer_expired();
        assert_eq!(drain(&mut master), vec![Event::Ready]);
        assert!(master.port_mut().take_tx().is_empty());
        assert!(master.request_read_coils(1, 0, 8).is_ok());
    }
}
