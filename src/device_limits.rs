//! # Device Limits Configuration
//!
//! Per-request count maxima enforced by the request builders.
//!
//! ## Protocol Limits
//!
//! - **Read Coils/Discrete Inputs (FC01/02)**: Max 2000 (0x07D0) bits per request
//! - **Write Multiple Coils (FC15)**: Max 1968 (0x07B0) coils per request
//! - **Read Holding/Input Registers (FC03/04)**: Max 125 (0x007D) registers
//! - **Write Multiple Registers (FC16)**: Max 120 (0x0078) registers
//! - **Read/Write Multiple Registers (FC23)**: read 125, write 120
//!
//! Some devices accept less; lower the limits for them. Raising a limit above
//! the protocol maximum is rejected by [`DeviceLimits::validate`].

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::{ModbusError, ModbusResult};

/// Device-specific request limits.
///
/// # Example
///
/// ```rust
/// use voltage_modbus_master::DeviceLimits;
///
/// // A meter that only answers 50 registers per read
/// let limits = DeviceLimits::new().with_max_read_registers(50);
///
/// assert_eq!(limits.max_read_registers, 50);
/// assert!(limits.check_read_registers(51).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum registers per read request.
    pub max_read_registers: u16,
    /// Maximum registers per write request.
    pub max_write_registers: u16,
    /// Maximum coils/discrete inputs per read request.
    pub max_read_coils: u16,
    /// Maximum coils per write request.
    pub max_write_coils: u16,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_registers: MAX_READ_REGISTERS,
            max_write_registers: MAX_WRITE_REGISTERS,
            max_read_coils: MAX_READ_COILS,
            max_write_coils: MAX_WRITE_COILS,
        }
    }
}

impl DeviceLimits {
    /// Create limits with the protocol maxima.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for older or slower devices: 50 registers, 500 coils.
    pub fn conservative() -> Self {
        Self {
            max_read_registers: 50,
            max_write_registers: 50,
            max_read_coils: 500,
            max_write_coils: 500,
        }
    }

    /// Set maximum read registers.
    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    /// Set maximum write registers.
    pub fn with_max_write_registers(mut self, count: u16) -> Self {
        self.max_write_registers = count;
        self
    }

    /// Set maximum read coils.
    pub fn with_max_read_coils(mut self, count: u16) -> Self {
        self.max_read_coils = count;
        self
    }

    /// Set maximum write coils.
    pub fn with_max_write_coils(mut self, count: u16) -> Self {
        self.max_write_coils = count;
        self
    }

    /// Reject limits of zero or above the protocol maxima.
    pub fn validate(&self) -> ModbusResult<()> {
        let checks = [
            ("max_read_registers", self.max_read_registers, MAX_READ_REGISTERS),
            ("max_write_registers", self.max_write_registers, MAX_WRITE_REGISTERS),
            ("max_read_coils", self.max_read_coils, MAX_READ_COILS),
            ("max_write_coils", self.max_write_coils, MAX_WRITE_COILS),
        ];
        for (name, value, max) in checks {
            if value == 0 || value > max {
                return Err(ModbusError::invalid_argument(format!(
                    "{} = {} outside 1..={}",
                    name, value, max
                )));
            }
        }
        Ok(())
    }

    /// Check a read-registers count (FC03/FC04/FC23 read part).
    pub fn check_read_registers(&self, count: u16) -> ModbusResult<()> {
        check_count("read register", count, self.max_read_registers)
    }

    /// Check a write-registers count (FC16/FC23 write part).
    pub fn check_write_registers(&self, count: u16) -> ModbusResult<()> {
        check_count("write register", count, self.max_write_registers)
    }

    /// Check a read-coils count (FC01/FC02).
    pub fn check_read_coils(&self, count: u16) -> ModbusResult<()> {
        check_count("read coil", count, self.max_read_coils)
    }

    /// Check a write-coils count (FC15).
    pub fn check_write_coils(&self, count: u16) -> ModbusResult<()> {
        check_count("write coil", count, self.max_write_coils)
    }
}

fn check_count(what: &str, count: u16, max: u16) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::invalid_argument(format!(
            "{} count {} outside 1..={}",
            what, count, max
        )));
    }
    Ok(())
}
