//! # Error Types
//!
//! Local error taxonomy of the master engine.
//!
//! Two families of failure exist and they are kept apart:
//!
//! - [`ModbusError`] describes things that go wrong *on this side of the wire*:
//!   bad arguments, port initialization failures, framing/CRC problems, a busy
//!   transaction token, misuse of the enable/disable state machine.
//! - [`ModbusException`](crate::protocol::ModbusException) is the in-band
//!   protocol exception carried by a response PDU. Response handlers produce
//!   those; `From<&ModbusError>` maps the former onto the latter.

use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Master engine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Address/count outside the configured range of a register table
    #[error("No such register: {message}")]
    NoSuchRegister { message: String },

    /// Bad input to a request builder or to `init`
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Underlying port collaborator failed to initialize
    #[error("Port error: {message}")]
    Port { message: String },

    /// Fixed-capacity buffer too small
    #[error("Insufficient resources: {message}")]
    InsufficientResources { message: String },

    /// Framing or CRC failure, or bus not ready for transmission
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Enable/disable called in the wrong protocol state
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// A transaction is already outstanding
    #[error("Busy: {message}")]
    Busy { message: String },

    /// Operation timed out
    #[error("Timeout: {message}")]
    Timeout { message: String },
}

impl ModbusError {
    pub fn no_such_register(message: impl Into<String>) -> Self {
        ModbusError::NoSuchRegister {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ModbusError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn port(message: impl Into<String>) -> Self {
        ModbusError::Port {
            message: message.into(),
        }
    }

    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        ModbusError::InsufficientResources {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        ModbusError::Io {
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        ModbusError::IllegalState {
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        ModbusError::Busy {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ModbusError::Timeout {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later can succeed.
    ///
    /// `IllegalState` and `InvalidArgument` are programmer errors and never are.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ModbusError::Busy { .. } | ModbusError::Timeout { .. } | ModbusError::Io { .. }
        )
    }
}

#[cfg(feature = "rtu")]
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ModbusError::timeout(err.to_string()),
            _ => ModbusError::io(err.to_string()),
        }
    }
}
