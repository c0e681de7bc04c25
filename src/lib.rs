//! # Voltage Modbus Master - Event-Driven Modbus RTU Master Engine
//!
//! A Modbus RTU master protocol stack for serial fieldbus lines. The engine is
//! driven entirely by port callbacks (byte received, transmitter empty, timer
//! expired) and by periodic calls to
//! [`ModbusMaster::main_function`]; it never blocks and never spawns.
//!
//! Responses are not returned to the caller. Each one is decoded against the
//! request that caused it and written into a per-slave shadow register file
//! ([`RegisterStore`]), which the application reads afterwards.
//!
//! ## Features
//!
//! - **Event-driven**: one event per `main_function` call, posted by the
//!   framing layer or by request submission
//! - **RTU framing**: T3.5 frame delimiting, CRC-16 validation, respond
//!   timeout and broadcast turnaround delay
//! - **Shadow register file**: coils, discrete inputs, holding and input
//!   registers for every slave `1..=max_slaves`
//! - **Single outstanding transaction**: a resource token makes concurrent
//!   requests fail fast with `Busy`
//! - **Broadcast**: write payloads sent to address 0 are applied to every
//!   slave's shadow copy once the turnaround delay elapses
//! - **Pluggable port**: event queue, resource token, serial line, timers and
//!   critical section are traits; a tokio serial port ships behind `rtu`
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//! | 0x11 | Report Slave ID | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_modbus_master::{MasterConfig, ModbusMaster, RegisterStore};
//!
//! let mut master = ModbusMaster::new(MasterConfig::default(), my_port, RegisterStore::default());
//! master.init()?;
//! master.enable()?;
//!
//! // Queue a read of two holding registers at address 100 on slave 1
//! master.request_read_holding_registers(1, 100, 2)?;
//!
//! // Main loop; the port's interrupt handlers call
//! // master.on_byte_received(), on_transmitter_empty() and on_timer_expired()
//! loop {
//!     master.main_function();
//!     if let Ok(value) = master.store().holding(1, 100) {
//!         println!("register 100 = {}", value);
//!     }
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Function codes, exceptions and engine state enums
pub mod protocol;

/// CRC-16/MODBUS
pub mod crc;

/// Stack-allocated PDU and request encoding
pub mod pdu;

/// Device-specific protocol limits configuration
pub mod device_limits;

/// Master configuration and timer durations
pub mod config;

/// Logging helpers for frame dumps
pub mod logging;

// ============================================================================
// Master engine
// ============================================================================

/// Per-slave shadow register file
pub mod store;

/// Report Slave ID buffer
pub mod slave_id;

/// Response handlers and the function code table
pub mod functions;

/// Port contracts: event queue, resource, serial line, timers, critical section
pub mod port;

/// Framing transport abstraction
pub mod transport;

/// RTU framing state machines
pub mod rtu;

/// Protocol dispatcher
pub mod master;

/// Tokio serial port and async driver
#[cfg(feature = "rtu")]
pub mod serial;

/// Scriptable in-memory port
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Core master API ===
pub use master::{MasterStats, ModbusMaster};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ErrorEvent, Event, ModbusException, ModbusFunction, ProtocolState, SlaveId};

// === Configuration ===
pub use config::{MasterConfig, TimerConfig, TransportMode};
pub use device_limits::DeviceLimits;

// === Register file ===
pub use slave_id::SlaveIdBuffer;
pub use store::{Access, RegisterAccess, RegisterStore, StoreConfig};

// === Port ===
pub use port::{
    CriticalSection, EventQueue, FlagEventQueue, FlagSection, Port, Resource, Serial, SerialMode,
    TimerMode, Timers, TokenResource,
};

// === Framing ===
pub use rtu::RtuTransport;
pub use transport::{FrameSignal, FrameTransport};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    BROADCAST_ADDRESS, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder, Request};

#[cfg(feature = "rtu")]
pub use serial::{SerialBridge, TokioPort};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockPort;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Master v{} - Modbus RTU master engine", VERSION)
}
