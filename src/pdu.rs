//! Modbus PDU: stack buffer, fluent builder and request encode/decode
//!
//! A fixed-size stack array avoids heap allocation on the request path. The
//! [`Request`] enum is the typed form of every request the master can issue;
//! `encode` produces the wire PDU and `decode` recovers the request from a
//! PDU still resident in the send buffer.

use tracing::debug;

use crate::constants::*;
use crate::device_limits::DeviceLimits;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    #[inline]
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::insufficient_resources(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        match pdu.function_code() {
            Some(fc) if pdu.is_exception() => debug!(
                "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                fc,
                Self::function_code_description(fc),
                pdu.exception_code().unwrap_or(0)
            ),
            Some(fc) => debug!(
                "PDU parsed: FC={:02X} ({}), data_len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len - 1
            ),
            None => debug!("PDU parsed: empty PDU"),
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::insufficient_resources("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::insufficient_resources(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clear PDU
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & FC_ERROR_MASK != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        ModbusFunction::from_u8(fc & !FC_ERROR_MASK)
            .map(ModbusFunction::name)
            .unwrap_or("Unknown Function")
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    /// Set function code
    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    /// Add address
    #[inline]
    pub fn address(mut self, addr: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    /// Add quantity (or any other big-endian word)
    #[inline]
    pub fn quantity(mut self, qty: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Add data
    #[inline]
    pub fn data(mut self, data: &[u8]) -> ModbusResult<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    /// Add register values in big-endian
    #[inline]
    pub fn registers(mut self, values: &[u16]) -> ModbusResult<Self> {
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    /// Build the PDU
    #[inline]
    pub fn build(self) -> ModbusPdu {
        match self.pdu.function_code() {
            Some(fc) => debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            ),
            None => debug!("PDU built: empty PDU"),
        }
        self.pdu
    }
}

// ============================================================================
// Typed requests
// ============================================================================

/// A master request, one variant per supported function code
///
/// Addresses are the 0-based values carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils {
        address: u16,
        count: u16,
    },
    ReadDiscreteInputs {
        address: u16,
        count: u16,
    },
    ReadHoldingRegisters {
        address: u16,
        count: u16,
    },
    ReadInputRegisters {
        address: u16,
        count: u16,
    },
    /// `value` is the raw wire value, `0xFF00` (on) or `0x0000` (off)
    WriteSingleCoil {
        address: u16,
        value: u16,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    /// `values` holds `ceil(count / 8)` LSB-first packed bytes
    WriteMultipleCoils {
        address: u16,
        count: u16,
        values: Vec<u8>,
    },
    WriteMultipleRegisters {
        address: u16,
        values: Vec<u16>,
    },
    /// The write is performed before the read
    ReadWriteMultipleRegisters {
        read_address: u16,
        read_count: u16,
        write_address: u16,
        values: Vec<u16>,
    },
    ReportSlaveId,
}

impl Request {
    pub fn function(&self) -> ModbusFunction {
        match self {
            Request::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Request::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
            Request::ReadWriteMultipleRegisters { .. } => {
                ModbusFunction::ReadWriteMultipleRegisters
            }
            Request::ReportSlaveId => ModbusFunction::ReportSlaveId,
        }
    }

    /// Validate against `limits` and write the request PDU
    pub fn encode(&self, limits: &DeviceLimits) -> ModbusResult<ModbusPdu> {
        let fc = self.function().to_u8();
        let builder = PduBuilder::new().function_code(fc)?;

        let builder = match self {
            Request::ReadCoils { address, count }
            | Request::ReadDiscreteInputs { address, count } => {
                limits.check_read_coils(*count)?;
                check_span(*address, *count)?;
                builder.address(*address)?.quantity(*count)?
            }
            Request::ReadHoldingRegisters { address, count }
            | Request::ReadInputRegisters { address, count } => {
                limits.check_read_registers(*count)?;
                check_span(*address, *count)?;
                builder.address(*address)?.quantity(*count)?
            }
            Request::WriteSingleCoil { address, value } => {
                if *value != COIL_ON && *value != COIL_OFF {
                    return Err(ModbusError::invalid_argument(format!(
                        "coil value 0x{:04X} must be 0xFF00 or 0x0000",
                        value
                    )));
                }
                builder.address(*address)?.quantity(*value)?
            }
            Request::WriteSingleRegister { address, value } => {
                builder.address(*address)?.quantity(*value)?
            }
            Request::WriteMultipleCoils {
                address,
                count,
                values,
            } => {
                limits.check_write_coils(*count)?;
                check_span(*address, *count)?;
                let byte_count = (*count as usize).div_ceil(8);
                if values.len() != byte_count {
                    return Err(ModbusError::invalid_argument(format!(
                        "{} coils need {} packed bytes, got {}",
                        count,
                        byte_count,
                        values.len()
                    )));
                }
                builder
                    .address(*address)?
                    .quantity(*count)?
                    .byte(byte_count as u8)?
                    .data(values)?
            }
            Request::WriteMultipleRegisters { address, values } => {
                let count = register_count(values)?;
                limits.check_write_registers(count)?;
                check_span(*address, count)?;
                builder
                    .address(*address)?
                    .quantity(count)?
                    .byte((count * 2) as u8)?
                    .registers(values)?
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                values,
            } => {
                let write_count = register_count(values)?;
                limits.check_read_registers(*read_count)?;
                limits.check_write_registers(write_count)?;
                check_span(*read_address, *read_count)?;
                check_span(*write_address, write_count)?;
                builder
                    .address(*read_address)?
                    .quantity(*read_count)?
                    .address(*write_address)?
                    .quantity(write_count)?
                    .byte((write_count * 2) as u8)?
                    .registers(values)?
            }
            Request::ReportSlaveId => builder,
        };

        Ok(builder.build())
    }

    /// Recover a request from its PDU
    ///
    /// Only the wire layout is checked here; count limits are the encoder's
    /// concern.
    pub fn decode(pdu: &[u8]) -> ModbusResult<Request> {
        let (&fc, data) = pdu
            .split_first()
            .ok_or_else(|| ModbusError::invalid_argument("empty request PDU"))?;
        let function = ModbusFunction::from_u8(fc).ok_or_else(|| {
            ModbusError::invalid_argument(format!("unsupported function code 0x{:02X}", fc))
        })?;

        let request = match function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {
                expect_len(function, data, 4)?;
                let address = word(data, 0);
                let count = word(data, 2);
                match function {
                    ModbusFunction::ReadCoils => Request::ReadCoils { address, count },
                    ModbusFunction::ReadDiscreteInputs => {
                        Request::ReadDiscreteInputs { address, count }
                    }
                    ModbusFunction::ReadHoldingRegisters => {
                        Request::ReadHoldingRegisters { address, count }
                    }
                    _ => Request::ReadInputRegisters { address, count },
                }
            }
            ModbusFunction::WriteSingleCoil => {
                expect_len(function, data, 4)?;
                Request::WriteSingleCoil {
                    address: word(data, 0),
                    value: word(data, 2),
                }
            }
            ModbusFunction::WriteSingleRegister => {
                expect_len(function, data, 4)?;
                Request::WriteSingleRegister {
                    address: word(data, 0),
                    value: word(data, 2),
                }
            }
            ModbusFunction::WriteMultipleCoils => {
                expect_min_len(function, data, 5)?;
                let count = word(data, 2);
                let byte_count = data[4] as usize;
                expect_len(function, data, 5 + byte_count)?;
                Request::WriteMultipleCoils {
                    address: word(data, 0),
                    count,
                    values: data[5..].to_vec(),
                }
            }
            ModbusFunction::WriteMultipleRegisters => {
                expect_min_len(function, data, 5)?;
                let count = word(data, 2) as usize;
                let byte_count = data[4] as usize;
                if byte_count != count * 2 {
                    return Err(ModbusError::invalid_argument(format!(
                        "{}: byte count {} for {} registers",
                        function, byte_count, count
                    )));
                }
                expect_len(function, data, 5 + byte_count)?;
                Request::WriteMultipleRegisters {
                    address: word(data, 0),
                    values: words(&data[5..]),
                }
            }
            ModbusFunction::ReadWriteMultipleRegisters => {
                expect_min_len(function, data, 9)?;
                let write_count = word(data, 6) as usize;
                let byte_count = data[8] as usize;
                if byte_count != write_count * 2 {
                    return Err(ModbusError::invalid_argument(format!(
                        "{}: byte count {} for {} registers",
                        function, byte_count, write_count
                    )));
                }
                expect_len(function, data, 9 + byte_count)?;
                Request::ReadWriteMultipleRegisters {
                    read_address: word(data, 0),
                    read_count: word(data, 2),
                    write_address: word(data, 4),
                    values: words(&data[9..]),
                }
            }
            ModbusFunction::ReportSlaveId => {
                expect_len(function, data, 0)?;
                Request::ReportSlaveId
            }
        };

        Ok(request)
    }
}

#[inline]
fn word(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn words(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn register_count(values: &[u16]) -> ModbusResult<u16> {
    u16::try_from(values.len())
        .map_err(|_| ModbusError::invalid_argument(format!("{} registers", values.len())))
}

/// The addressed range must not run past 0xFFFF
fn check_span(address: u16, count: u16) -> ModbusResult<()> {
    if address as u32 + count as u32 > 0x1_0000 {
        return Err(ModbusError::invalid_argument(format!(
            "address {} + count {} exceeds the 16-bit address space",
            address, count
        )));
    }
    Ok(())
}

fn expect_len(function: ModbusFunction, data: &[u8], len: usize) -> ModbusResult<()> {
    if data.len() != len {
        return Err(ModbusError::invalid_argument(format!(
            "{}: {} data bytes, expected {}",
            function,
            data.len(),
            len
        )));
    }
    Ok(())
}

fn expect_min_len(function: ModbusFunction, data: &[u8], len: usize) -> ModbusResult<()> {
    if data.len() < len {
        return Err(ModbusError::invalid_argument(format!(
            "{}: {} data bytes, at least {} expected",
            function,
            data.len(),
            len
        )));
    }
    Ok(())
}
