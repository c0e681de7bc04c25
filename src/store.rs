//! # Shadow Register Store
//!
//! The master's local copy of every slave's data points: coils, discrete
//! inputs, holding registers and input registers, each indexed
//! `[slave - 1][address - base]`.
//!
//! ## Packing
//!
//! - Bit tables hold 8 points per byte, LSB first, exactly as on the wire.
//!   Updates go through [`set_bits`]/[`get_bits`], which work on a 16-bit
//!   window spanning two bytes so a field may straddle a byte boundary.
//! - Word tables hold native `u16` values; the access callbacks move them
//!   to and from big-endian wire bytes.
//!
//! Response handlers reach the store through the [`RegisterAccess`] trait,
//! so an application may substitute its own data model.

use crate::constants::DEFAULT_SLAVE_COUNT;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::slave_id::SlaveIdBuffer;

// ============================================================================
// Bit primitives
// ============================================================================

/// Write the low `count` (≤ 8) bits of `value` at `bit_offset` in `buf`.
///
/// Bits past the end of `buf` are dropped.
pub fn set_bits(buf: &mut [u8], bit_offset: usize, count: u8, value: u8) {
    let count = count.min(8);
    if count == 0 {
        return;
    }
    let byte = bit_offset / 8;
    let shift = bit_offset % 8;
    let mask: u16 = ((1u16 << count) - 1) << shift;
    let value = (value as u16) << shift;

    let lo = buf.get(byte).copied().unwrap_or(0) as u16;
    let hi = buf.get(byte + 1).copied().unwrap_or(0) as u16;
    let window = ((lo | (hi << 8)) & !mask) | (value & mask);

    if let Some(b) = buf.get_mut(byte) {
        *b = window as u8;
    }
    if let Some(b) = buf.get_mut(byte + 1) {
        *b = (window >> 8) as u8;
    }
}

/// Read `count` (≤ 8) bits at `bit_offset` in `buf`; missing bytes read as zero
pub fn get_bits(buf: &[u8], bit_offset: usize, count: u8) -> u8 {
    let count = count.min(8);
    if count == 0 {
        return 0;
    }
    let byte = bit_offset / 8;
    let shift = bit_offset % 8;
    let mask: u16 = (1u16 << count) - 1;

    let lo = buf.get(byte).copied().unwrap_or(0) as u16;
    let hi = buf.get(byte + 1).copied().unwrap_or(0) as u16;
    (((lo | (hi << 8)) >> shift) & mask) as u8
}

// ============================================================================
// Configuration
// ============================================================================

/// Base address and size of one register table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    pub base: u16,
    pub count: u16,
}

impl TableConfig {
    pub const fn new(base: u16, count: u16) -> Self {
        Self { base, count }
    }

    /// Offset of `[address, address + count)` inside the table, if it fits
    fn offset_of(&self, address: u16, count: u16) -> Option<usize> {
        let start = address as u32;
        let end = start + count as u32;
        let base = self.base as u32;
        if start >= base && end <= base + self.count as u32 {
            Some((start - base) as usize)
        } else {
            None
        }
    }
}

/// Shape of the shadow register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of slaves (addresses 1..=slaves)
    pub slaves: u8,
    pub coils: TableConfig,
    pub discrete_inputs: TableConfig,
    pub holding_registers: TableConfig,
    pub input_registers: TableConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            slaves: DEFAULT_SLAVE_COUNT,
            coils: TableConfig::new(0, 64),
            discrete_inputs: TableConfig::new(0, 16),
            holding_registers: TableConfig::new(0, 100),
            input_registers: TableConfig::new(0, 100),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slaves(mut self, slaves: u8) -> Self {
        self.slaves = slaves;
        self
    }

    pub fn with_coils(mut self, base: u16, count: u16) -> Self {
        self.coils = TableConfig::new(base, count);
        self
    }

    pub fn with_discrete_inputs(mut self, base: u16, count: u16) -> Self {
        self.discrete_inputs = TableConfig::new(base, count);
        self
    }

    pub fn with_holding_registers(mut self, base: u16, count: u16) -> Self {
        self.holding_registers = TableConfig::new(base, count);
        self
    }

    pub fn with_input_registers(mut self, base: u16, count: u16) -> Self {
        self.input_registers = TableConfig::new(base, count);
        self
    }
}

// ============================================================================
// Access callbacks
// ============================================================================

/// Direction of a store access
#[derive(Debug)]
pub enum Access<'a> {
    /// Copy table contents out into the buffer (wire packing)
    Read(&'a mut [u8]),
    /// Copy wire-packed bytes from the buffer into the table
    Write(&'a [u8]),
}

/// Store callbacks invoked by the response handlers
///
/// `slave` is the 1-based slave address, `address` the 0-based register
/// address as carried on the wire. Bit tables exchange LSB-first packed
/// bytes; word tables exchange big-endian byte pairs.
pub trait RegisterAccess {
    /// Number of slaves with tables, addressed `1..=slaves()`
    fn slaves(&self) -> u8;

    fn coils(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()>;

    fn discrete_inputs(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()>;

    fn holding_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()>;

    fn input_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()>;

    /// Identification reported by a slave through FC17
    fn slave_id(&mut self, _slave: SlaveId, _report: &SlaveIdBuffer) -> ModbusResult<()> {
        Ok(())
    }
}

// ============================================================================
// Default store
// ============================================================================

/// In-memory shadow register file
#[derive(Debug, Clone)]
pub struct RegisterStore {
    config: StoreConfig,
    coils: Vec<Vec<u8>>,
    discrete_inputs: Vec<Vec<u8>>,
    holding_registers: Vec<Vec<u16>>,
    input_registers: Vec<Vec<u16>>,
    identities: Vec<Option<SlaveIdBuffer>>,
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl RegisterStore {
    pub fn new(config: StoreConfig) -> Self {
        let slaves = config.slaves as usize;
        let bit_bytes = |t: TableConfig| (t.count as usize).div_ceil(8);
        Self {
            coils: vec![vec![0; bit_bytes(config.coils)]; slaves],
            discrete_inputs: vec![vec![0; bit_bytes(config.discrete_inputs)]; slaves],
            holding_registers: vec![vec![0; config.holding_registers.count as usize]; slaves],
            input_registers: vec![vec![0; config.input_registers.count as usize]; slaves],
            identities: vec![None; slaves],
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Coil state of one slave
    pub fn coil(&self, slave: SlaveId, address: u16) -> ModbusResult<bool> {
        let (index, offset) = self.locate(slave, self.config.coils, address, 1, "coil")?;
        Ok(get_bits(&self.coils[index], offset, 1) != 0)
    }

    pub fn discrete_input(&self, slave: SlaveId, address: u16) -> ModbusResult<bool> {
        let (index, offset) =
            self.locate(slave, self.config.discrete_inputs, address, 1, "discrete input")?;
        Ok(get_bits(&self.discrete_inputs[index], offset, 1) != 0)
    }

    pub fn holding(&self, slave: SlaveId, address: u16) -> ModbusResult<u16> {
        let (index, offset) =
            self.locate(slave, self.config.holding_registers, address, 1, "holding register")?;
        Ok(self.holding_registers[index][offset])
    }

    pub fn input(&self, slave: SlaveId, address: u16) -> ModbusResult<u16> {
        let (index, offset) =
            self.locate(slave, self.config.input_registers, address, 1, "input register")?;
        Ok(self.input_registers[index][offset])
    }

    /// Last identification reported by `slave`
    pub fn reported_slave_id(&self, slave: SlaveId) -> Option<&SlaveIdBuffer> {
        self.slave_index(slave)
            .ok()
            .and_then(|index| self.identities[index].as_ref())
    }

    /// Clear every table back to zero
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn slave_index(&self, slave: SlaveId) -> ModbusResult<usize> {
        if slave == 0 || slave > self.config.slaves {
            return Err(ModbusError::no_such_register(format!(
                "slave {} outside 1..={}",
                slave, self.config.slaves
            )));
        }
        Ok(slave as usize - 1)
    }

    fn locate(
        &self,
        slave: SlaveId,
        table: TableConfig,
        address: u16,
        count: u16,
        what: &str,
    ) -> ModbusResult<(usize, usize)> {
        let index = self.slave_index(slave)?;
        let offset = table.offset_of(address, count).ok_or_else(|| {
            ModbusError::no_such_register(format!(
                "{} {}..+{} outside {}..+{}",
                what, address, count, table.base, table.count
            ))
        })?;
        Ok((index, offset))
    }
}

fn access_bits(table: &mut [u8], offset: usize, count: u16, access: Access<'_>) -> ModbusResult<()> {
    let count = count as usize;
    let needed = count.div_ceil(8);
    let full = count / 8;
    let rest = (count % 8) as u8;

    match access {
        Access::Write(src) => {
            if src.len() < needed {
                return Err(ModbusError::invalid_argument(format!(
                    "bit payload of {} bytes, {} required",
                    src.len(),
                    needed
                )));
            }
            for (i, &byte) in src[..full].iter().enumerate() {
                set_bits(table, offset + i * 8, 8, byte);
            }
            if rest > 0 {
                set_bits(table, offset + full * 8, rest, src[full]);
            }
        }
        Access::Read(dst) => {
            if dst.len() < needed {
                return Err(ModbusError::insufficient_resources(format!(
                    "bit buffer of {} bytes, {} required",
                    dst.len(),
                    needed
                )));
            }
            for (i, byte) in dst[..full].iter_mut().enumerate() {
                *byte = get_bits(table, offset + i * 8, 8);
            }
            if rest > 0 {
                dst[full] = get_bits(table, offset + full * 8, rest);
            }
        }
    }
    Ok(())
}

fn access_words(
    table: &mut [u16],
    offset: usize,
    count: u16,
    access: Access<'_>,
) -> ModbusResult<()> {
    let count = count as usize;
    let words = &mut table[offset..offset + count];

    match access {
        Access::Write(src) => {
            if src.len() < count * 2 {
                return Err(ModbusError::invalid_argument(format!(
                    "register payload of {} bytes, {} required",
                    src.len(),
                    count * 2
                )));
            }
            for (word, pair) in words.iter_mut().zip(src.chunks_exact(2)) {
                *word = u16::from_be_bytes([pair[0], pair[1]]);
            }
        }
        Access::Read(dst) => {
            if dst.len() < count * 2 {
                return Err(ModbusError::insufficient_resources(format!(
                    "register buffer of {} bytes, {} required",
                    dst.len(),
                    count * 2
                )));
            }
            for (word, pair) in words.iter().zip(dst.chunks_exact_mut(2)) {
                pair.copy_from_slice(&word.to_be_bytes());
            }
        }
    }
    Ok(())
}

impl RegisterAccess for RegisterStore {
    fn slaves(&self) -> u8 {
        self.config.slaves
    }

    fn coils(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()> {
        let (index, offset) = self.locate(slave, self.config.coils, address, count, "coil")?;
        access_bits(&mut self.coils[index], offset, count, access)
    }

    fn discrete_inputs(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()> {
        let (index, offset) =
            self.locate(slave, self.config.discrete_inputs, address, count, "discrete input")?;
        access_bits(&mut self.discrete_inputs[index], offset, count, access)
    }

    fn holding_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()> {
        let (index, offset) = self.locate(
            slave,
            self.config.holding_registers,
            address,
            count,
            "holding register",
        )?;
        access_words(&mut self.holding_registers[index], offset, count, access)
    }

    fn input_registers(
        &mut self,
        slave: SlaveId,
        address: u16,
        count: u16,
        access: Access<'_>,
    ) -> ModbusResult<()> {
        let (index, offset) =
            self.locate(slave, self.config.input_registers, address, count, "input register")?;
        access_words(&mut self.input_registers[index], offset, count, access)
    }

    fn slave_id(&mut self, slave: SlaveId, report: &SlaveIdBuffer) -> ModbusResult<()> {
        let index = self.slave_index(slave)?;
        self.identities[index] = Some(report.clone());
        Ok(())
    }
}
