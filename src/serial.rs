//! # Tokio Serial Port
//!
//! Host-side port for the master on top of any tokio byte stream, usually a
//! [`tokio_serial::SerialStream`].
//!
//! - [`SerialBridge`] buffers the byte-at-a-time [`Serial`] callouts in front
//!   of the async stream.
//! - [`TokioPort`] adds the lock-free event queue, resource token, critical
//!   section and deadline-based timers.
//! - [`poll`] performs one round of I/O: dispatch pending events, push the
//!   transmit buffer out, then wait for incoming bytes or the running timer.
//!
//! ```rust,no_run
//! use voltage_modbus_master::serial::{open, poll, TokioPort};
//! use voltage_modbus_master::{MasterConfig, ModbusMaster, RegisterStore, TimerConfig};
//!
//! # async fn run() -> voltage_modbus_master::ModbusResult<()> {
//! let bridge = open("/dev/ttyUSB0", 19200, Default::default())?;
//! let config = MasterConfig::default().with_timers(TimerConfig::for_baud_rate(19200));
//! let mut master = ModbusMaster::new(config, TokioPort::from_bridge(bridge), RegisterStore::default());
//! master.init()?;
//! master.enable()?;
//!
//! master.request_read_holding_registers(1, 0, 4)?;
//! while master.port().is_busy() {
//!     poll(&mut master).await?;
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, trace};

use crate::config::TimerConfig;
use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::master::ModbusMaster;
use crate::port::{
    CriticalSection, EventQueue, FlagEventQueue, FlagSection, Resource, Serial, SerialMode,
    TimerMode, Timers, TokenResource,
};
use crate::protocol::Event;
use crate::store::RegisterAccess;

/// Line settings for [`open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Open a serial device for RTU traffic
pub fn open(
    path: &str,
    baud_rate: u32,
    settings: LineSettings,
) -> ModbusResult<SerialBridge<SerialStream>> {
    let builder = tokio_serial::new(path, baud_rate)
        .data_bits(settings.data_bits)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity);

    let stream = SerialStream::open(&builder).map_err(|e| {
        ModbusError::port(format!("Failed to open serial port {}: {}", path, e))
    })?;
    debug!("opened {} at {} baud", path, baud_rate);
    Ok(SerialBridge::new(stream))
}

// ============================================================================
// SerialBridge
// ============================================================================

/// Byte buffers between the [`Serial`] callouts and an async stream
#[derive(Debug)]
pub struct SerialBridge<T> {
    stream: T,
    rx: BytesMut,
    tx: BytesMut,
    mode: SerialMode,
}

impl<T> SerialBridge<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            rx: BytesMut::with_capacity(MAX_RTU_FRAME_SIZE),
            tx: BytesMut::with_capacity(MAX_RTU_FRAME_SIZE),
            mode: SerialMode::Rx,
        }
    }

    pub fn mode(&self) -> SerialMode {
        self.mode
    }

    /// Bytes read from the stream but not yet taken by `get_byte`
    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    /// Bytes queued by `put_byte` but not yet flushed
    pub fn pending_tx(&self) -> usize {
        self.tx.len()
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SerialBridge<T> {
    /// Write every queued byte to the stream
    pub async fn flush(&mut self) -> ModbusResult<usize> {
        if self.tx.is_empty() {
            return Ok(0);
        }
        let len = self.tx.len();
        self.stream.write_all(&self.tx).await?;
        self.stream.flush().await?;
        self.tx.clear();
        trace!("flushed {} bytes", len);
        Ok(len)
    }

    /// Wait for the next chunk from the stream. Cancel safe.
    pub async fn fill(&mut self) -> ModbusResult<usize> {
        let mut chunk = [0u8; MAX_RTU_FRAME_SIZE];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ModbusError::io("serial stream closed"));
        }
        self.rx.put_slice(&chunk[..n]);
        trace!("received {} bytes", n);
        Ok(n)
    }
}

impl<T> Serial for SerialBridge<T> {
    fn serial_init(&mut self) -> bool {
        self.rx.clear();
        self.tx.clear();
        self.mode = SerialMode::Rx;
        true
    }

    fn set_mode(&mut self, mode: SerialMode) {
        self.mode = mode;
    }

    fn get_byte(&mut self) -> Option<u8> {
        self.rx.has_remaining().then(|| self.rx.get_u8())
    }

    fn put_byte(&mut self, byte: u8) -> bool {
        if self.tx.len() >= MAX_RTU_FRAME_SIZE {
            return false;
        }
        self.tx.put_u8(byte);
        true
    }
}

// ============================================================================
// TokioPort
// ============================================================================

/// Complete port on a tokio stream
#[derive(Debug)]
pub struct TokioPort<T> {
    serial: SerialBridge<T>,
    events: FlagEventQueue,
    token: TokenResource,
    section: FlagSection,
    timers: TimerConfig,
    running: Option<(TimerMode, Instant)>,
}

impl<T> TokioPort<T> {
    pub fn new(stream: T) -> Self {
        Self::from_bridge(SerialBridge::new(stream))
    }

    pub fn from_bridge(serial: SerialBridge<T>) -> Self {
        Self {
            serial,
            events: FlagEventQueue::new(),
            token: TokenResource::new(),
            section: FlagSection::new(),
            timers: TimerConfig::default(),
            running: None,
        }
    }

    pub fn serial(&self) -> &SerialBridge<T> {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut SerialBridge<T> {
        &mut self.serial
    }

    /// Timer currently armed
    pub fn running_timer(&self) -> Option<TimerMode> {
        self.running.map(|(mode, _)| mode)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.running.map(|(_, deadline)| deadline)
    }

    /// A transaction holds the resource token
    pub fn is_busy(&self) -> bool {
        self.token.is_held()
    }
}

impl<T> EventQueue for TokioPort<T> {
    fn event_init(&mut self) -> bool {
        self.events.clear();
        true
    }

    fn post(&mut self, event: Event) -> bool {
        self.events.post(event)
    }

    fn get(&mut self) -> Option<Event> {
        self.events.get()
    }
}

impl<T> Resource for TokioPort<T> {
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

impl<T> Serial for TokioPort<T> {
    fn serial_init(&mut self) -> bool {
        self.serial.serial_init()
    }

    fn set_mode(&mut self, mode: SerialMode) {
        self.serial.set_mode(mode);
    }

    fn get_byte(&mut self) -> Option<u8> {
        self.serial.get_byte()
    }

    fn put_byte(&mut self, byte: u8) -> bool {
        self.serial.put_byte(byte)
    }
}

impl<T> Timers for TokioPort<T> {
    fn timers_init(&mut self, config: &TimerConfig) -> bool {
        self.timers = *config;
        self.running = None;
        config.validate().is_ok()
    }

    fn enable(&mut self, mode: TimerMode) {
        self.running = Some((mode, Instant::now() + self.timers.duration(mode)));
    }

    fn disable(&mut self) {
        self.running = None;
    }
}

impl<T> CriticalSection for TokioPort<T> {
    fn enter(&mut self) {
        self.section.enter();
    }

    fn exit(&mut self) {
        self.section.exit();
    }
}

// ============================================================================
// Driver
// ============================================================================

/// One round of I/O for `master`
///
/// Dispatches pending events, transmits whatever the framing layer queued,
/// waits for either incoming bytes or the running timer, and dispatches
/// whatever that produced. With no timer
/// armed this waits for bytes indefinitely; wrap it in `tokio::time::timeout`
/// when that matters.
pub async fn poll<T, S>(master: &mut ModbusMaster<TokioPort<T>, S>) -> ModbusResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: RegisterAccess,
{
    while master.main_function().is_some() {}

    while master.port().serial().mode() == SerialMode::Tx {
        master.on_transmitter_empty();
    }
    master.port_mut().serial_mut().flush().await?;

    let port = master.port_mut();
    let received = match port.deadline() {
        Some(deadline) => tokio::select! {
            read = port.serial.fill() => Some(read?),
            _ = tokio::time::sleep_until(deadline) => None,
        },
        None => Some(port.serial.fill().await?),
    };

    match received {
        Some(count) => {
            for _ in 0..count {
                master.on_byte_received();
            }
        }
        None => master.on_timer_expired(),
    }

    while master.main_function().is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;
    use crate::protocol::ErrorEvent;
    use crate::{MasterConfig, RegisterStore};
    use std::time::Duration;
    use tokio::io::duplex;

    fn with_crc(frame: &[u8]) -> Vec<u8> {
        let mut out = frame.to_vec();
        out.extend_from_slice(&crc16(frame).to_le_bytes());
        out
    }

    fn fast_config() -> MasterConfig {
        MasterConfig::default().with_timers(
            TimerConfig::default()
                .with_t35(Duration::from_millis(2))
                .with_respond_timeout(Duration::from_millis(50))
                .with_convert_delay(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_bridge_flush() {
        let stream = tokio_test::io::Builder::new()
            .write(&[0x01, 0x02, 0x03])
            .build();
        let mut bridge = SerialBridge::new(stream);
        assert!(bridge.put_byte(0x01));
        assert!(bridge.put_byte(0x02));
        assert!(bridge.put_byte(0x03));
        assert_eq!(bridge.pending_tx(), 3);

        assert_eq!(bridge.flush().await.unwrap(), 3);
        assert_eq!(bridge.pending_tx(), 0);
        assert_eq!(bridge.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bridge_fill() {
        let stream = tokio_test::io::Builder::new().read(&[0xAA, 0xBB]).build();
        let mut bridge = SerialBridge::new(stream);
        assert_eq!(bridge.get_byte(), None);

        assert_eq!(bridge.fill().await.unwrap(), 2);
        assert_eq!(bridge.get_byte(), Some(0xAA));
        assert_eq!(bridge.get_byte(), Some(0xBB));
        assert_eq!(bridge.get_byte(), None);

        // Mock exhausted: end of stream
        assert!(matches!(bridge.fill().await, Err(ModbusError::Io { .. })));
    }

    #[test]
    fn test_bridge_tx_capacity() {
        let mut bridge = SerialBridge::new(tokio_test::io::Builder::new().build());
        for _ in 0..MAX_RTU_FRAME_SIZE {
            assert!(bridge.put_byte(0));
        }
        assert!(!bridge.put_byte(0));
    }

    #[test]
    fn test_port_timers() {
        let (local, _remote) = duplex(64);
        let mut port = TokioPort::new(local);
        assert!(port.timers_init(&TimerConfig::default()));
        assert_eq!(port.deadline(), None);

        port.enable(TimerMode::RespondTimeout);
        assert_eq!(port.running_timer(), Some(TimerMode::RespondTimeout));
        assert!(port.deadline().is_some());
        port.disable();
        assert_eq!(port.running_timer(), None);

        let zero = TimerConfig::default().with_t35(Duration::ZERO);
        assert!(!port.timers_init(&zero));
    }

    #[tokio::test]
    async fn test_read_holding_over_stream() {
        let (local, mut remote) = duplex(512);
        let mut master =
            ModbusMaster::new(fast_config(), TokioPort::new(local), RegisterStore::default());
        master.init().unwrap();
        master.enable().unwrap();

        // Startup silence, then Ready
        poll(&mut master).await.unwrap();

        master.request_read_holding_registers(1, 10, 2).unwrap();

        let slave = tokio::spawn(async move {
            let mut request = [0u8; 8];
            remote.read_exact(&mut request).await.unwrap();
            assert_eq!(request.to_vec(), with_crc(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]));
            remote
                .write_all(&with_crc(&[0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]))
                .await
                .unwrap();
            remote
        });

        for _ in 0..20 {
            poll(&mut master).await.unwrap();
            if !master.port().is_busy() {
                break;
            }
        }
        let _remote = slave.await.unwrap();

        assert_eq!(master.last_error(), None);
        assert_eq!(master.stats().executed, 1);
        assert_eq!(master.store().holding(1, 10).unwrap(), 0x1234);
        assert_eq!(master.store().holding(1, 11).unwrap(), 0x5678);
    }

    #[tokio::test]
    async fn test_respond_timeout_over_stream() {
        let (local, _remote) = duplex(512);
        let mut master =
            ModbusMaster::new(fast_config(), TokioPort::new(local), RegisterStore::default());
        master.init().unwrap();
        master.enable().unwrap();
        poll(&mut master).await.unwrap();

        master.request_read_coils(3, 0, 8).unwrap();
        for _ in 0..10 {
            poll(&mut master).await.unwrap();
            if !master.port().is_busy() {
                break;
            }
        }
        assert_eq!(master.last_error(), Some(ErrorEvent::RespondTimeout));
    }
}
