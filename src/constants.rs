//! Modbus protocol constants for the serial-line master
//!
//! These constants are derived from the Modbus application protocol and the
//! serial-line (RTU) implementation guide:
//! - Maximum serial frame: 256 bytes (address + 253 byte PDU + 2 byte CRC)
//! - Register/coil limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum RTU serial-line frame size (address + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Minimum RTU frame: address(1) + function(1) + CRC(2)
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Offset of the address byte inside a serial-line frame
pub const RTU_ADDRESS_OFFSET: usize = 0;

/// Offset of the PDU inside a serial-line frame
pub const RTU_PDU_OFFSET: usize = 1;

/// Size of the trailing CRC16
pub const RTU_CRC_SIZE: usize = 2;

/// Offset of the function code inside a PDU
pub const PDU_FUNC_OFFSET: usize = 0;

/// Offset of the data section inside a PDU
pub const PDU_DATA_OFFSET: usize = 1;

// ============================================================================
// Addressing
// ============================================================================

/// Broadcast destination; every slave accepts it and none answers
pub const BROADCAST_ADDRESS: u8 = 0;

/// Highest unicast slave address allowed on a serial line
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Default number of slaves handled by a master (addresses 1..=16)
pub const DEFAULT_SLAVE_COUNT: u8 = 16;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04/FC23-read (0x007D)
///
/// Response PDU: 1 (FC) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 0x007D;

/// Maximum number of registers for FC16/FC23-write (0x0078)
///
/// The FC23 request carries nine header bytes ahead of the write values:
/// 1 + 9 + N × 2 ≤ 253 → N ≤ 121, rounded down to the 120 the serial-line
/// guide specifies and applied to FC16 as well.
pub const MAX_WRITE_REGISTERS: u16 = 0x0078;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (0x07D0)
///
/// Response PDU: 1 + 1 + ceil(N / 8) ≤ 253 → N ≤ 2008, specified as 2000
pub const MAX_READ_COILS: u16 = 0x07D0;

/// Maximum number of coils for FC15 (0x07B0)
///
/// Request PDU: 1 + 2 + 2 + 1 + ceil(N / 8) ≤ 253 → N ≤ 1976, specified as 1968
pub const MAX_WRITE_COILS: u16 = 0x07B0;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Report Slave ID (FC17)
pub const FC_REPORT_SLAVE_ID: u8 = 0x11;

/// Read/Write Multiple Registers (FC23)
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

/// Bit set in the function code of an exception response
pub const FC_ERROR_MASK: u8 = 0x80;

/// Coil ON value on the wire
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value on the wire
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Slave Device Failure
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Slave Device Busy
pub const EXCEPTION_SLAVE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_FAILED: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Report Slave ID
// ============================================================================

/// Capacity of the Report Slave ID buffer (id + run flag + additional bytes)
pub const SLAVE_ID_BUFFER_SIZE: usize = 32;
