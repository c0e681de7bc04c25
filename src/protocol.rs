//! # Protocol Definitions
//!
//! Function codes, in-band exceptions and the event vocabulary shared by the
//! dispatcher, the framing layer and the port collaborators.

use std::fmt;

use crate::constants::*;
use crate::error::ModbusError;

/// Slave address on the serial line (0 = broadcast)
pub type SlaveId = u8;

// ============================================================================
// Function codes
// ============================================================================

/// Function codes handled by the master
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = FC_READ_COILS,
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
    ReportSlaveId = FC_REPORT_SLAVE_ID,
    ReadWriteMultipleRegisters = FC_READ_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    /// Decode a function code byte
    pub fn from_u8(code: u8) -> Option<Self> {
        let function = match code {
            FC_READ_COILS => Self::ReadCoils,
            FC_READ_DISCRETE_INPUTS => Self::ReadDiscreteInputs,
            FC_READ_HOLDING_REGISTERS => Self::ReadHoldingRegisters,
            FC_READ_INPUT_REGISTERS => Self::ReadInputRegisters,
            FC_WRITE_SINGLE_COIL => Self::WriteSingleCoil,
            FC_WRITE_SINGLE_REGISTER => Self::WriteSingleRegister,
            FC_WRITE_MULTIPLE_COILS => Self::WriteMultipleCoils,
            FC_WRITE_MULTIPLE_REGISTERS => Self::WriteMultipleRegisters,
            FC_REPORT_SLAVE_ID => Self::ReportSlaveId,
            FC_READ_WRITE_MULTIPLE_REGISTERS => Self::ReadWriteMultipleRegisters,
            _ => return None,
        };
        Some(function)
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Functions with nothing to apply when sent to the broadcast address
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
                | Self::ReadWriteMultipleRegisters
                | Self::ReportSlaveId
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReportSlaveId => "Report Slave ID",
            Self::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

// ============================================================================
// Exceptions
// ============================================================================

/// In-band protocol exception
///
/// A handler returning `Ok(())` corresponds to "no exception".
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = EXCEPTION_ILLEGAL_FUNCTION,
    IllegalDataAddress = EXCEPTION_ILLEGAL_DATA_ADDRESS,
    IllegalDataValue = EXCEPTION_ILLEGAL_DATA_VALUE,
    SlaveDeviceFailure = EXCEPTION_SLAVE_DEVICE_FAILURE,
    Acknowledge = EXCEPTION_ACKNOWLEDGE,
    SlaveBusy = EXCEPTION_SLAVE_BUSY,
    MemoryParityError = EXCEPTION_MEMORY_PARITY_ERROR,
    GatewayPathFailed = EXCEPTION_GATEWAY_PATH_FAILED,
    GatewayTargetFailed = EXCEPTION_GATEWAY_TARGET_FAILED,
}

impl ModbusException {
    /// Decode an exception byte; `0` and unassigned values yield `None`
    pub fn from_code(code: u8) -> Option<Self> {
        let exception = match code {
            EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            EXCEPTION_SLAVE_DEVICE_FAILURE => Self::SlaveDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => Self::Acknowledge,
            EXCEPTION_SLAVE_BUSY => Self::SlaveBusy,
            EXCEPTION_MEMORY_PARITY_ERROR => Self::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_FAILED => Self::GatewayPathFailed,
            EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayTargetFailed,
            _ => return None,
        };
        Some(exception)
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveDeviceFailure => "Slave device failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveBusy => "Slave device busy",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathFailed => "Gateway path unavailable",
            Self::GatewayTargetFailed => "Gateway target device failed to respond",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Map a local store/validation error onto the exception reported for it
impl From<&ModbusError> for ModbusException {
    fn from(err: &ModbusError) -> Self {
        match err {
            ModbusError::NoSuchRegister { .. } => ModbusException::IllegalDataAddress,
            ModbusError::Timeout { .. } => ModbusException::SlaveBusy,
            _ => ModbusException::SlaveDeviceFailure,
        }
    }
}

impl From<ModbusError> for ModbusException {
    fn from(err: ModbusError) -> Self {
        ModbusException::from(&err)
    }
}

// ============================================================================
// Dispatcher vocabulary
// ============================================================================

/// Global protocol state of a master instance
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    #[default]
    NotInitialized,
    Disabled,
    Enabled,
}

/// Events posted to the port event queue and drained by `main_function`
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Startup guard interval elapsed without line activity
    Ready,
    /// A complete frame sits in the receive buffer
    FrameReceived,
    /// The received (or broadcast) PDU is ready for its handler
    Execute,
    /// A request PDU is loaded and waiting for transmission
    FrameSent,
    /// The transaction failed; see [`ErrorEvent`]
    Error,
}

impl Event {
    /// All events, in the order a flag-based queue drains them
    pub const ALL: [Event; 5] = [
        Event::Ready,
        Event::FrameReceived,
        Event::Execute,
        Event::FrameSent,
        Event::Error,
    ];

    /// Bit used by flag-based event queues
    #[inline]
    pub fn bit(self) -> u8 {
        match self {
            Event::Ready => 1 << 0,
            Event::FrameReceived => 1 << 1,
            Event::Execute => 1 << 2,
            Event::FrameSent => 1 << 3,
            Event::Error => 1 << 4,
        }
    }
}

/// Context attached to the most recent [`Event::Error`]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorEvent {
    /// No byte arrived before the respond timeout
    RespondTimeout,
    /// Frame overrun, CRC failure or unexpected responder
    ReceiveDataError,
    /// Exception response, unknown function or handler rejection
    ExecuteFunctionError,
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorEvent::RespondTimeout => "respond timeout",
            ErrorEvent::ReceiveDataError => "receive data error",
            ErrorEvent::ExecuteFunctionError => "execute function error",
        };
        f.write_str(text)
    }
}
