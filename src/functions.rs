//! # Response Handlers
//!
//! One handler per function code. Each validates a response PDU against the
//! request still resident in the send buffer and copies the payload into the
//! shadow register file.
//!
//! The request is the source of truth for what was asked: addresses, counts
//! and expected byte counts are always re-derived from it, never trusted
//! from the response. Store failures become exceptions through
//! `From<ModbusError> for ModbusException`.
//!
//! After a broadcast there is no response; the dispatcher passes the request
//! PDU in its place and calls the handler once per slave. Read-only
//! functions have nothing to apply and return immediately.

use tracing::{debug, trace};

use crate::constants::*;
use crate::pdu::Request;
use crate::protocol::{ModbusException, ModbusFunction, SlaveId};
use crate::slave_id::SlaveIdBuffer;
use crate::store::{Access, RegisterAccess};

/// Everything a handler may look at besides the response PDU
pub struct HandlerContext<'a> {
    /// Request PDU as transmitted
    pub request: &'a [u8],
    /// Slave whose shadow tables are updated
    pub slave: SlaveId,
    /// The request went to the broadcast address
    pub broadcast: bool,
    pub store: &'a mut dyn RegisterAccess,
}

/// Response handler signature
pub type Handler = fn(&mut HandlerContext<'_>, &[u8]) -> Result<(), ModbusException>;

/// Function code to handler mapping
pub const HANDLERS: [(ModbusFunction, Handler); 10] = [
    (ModbusFunction::ReportSlaveId, handle_report_slave_id),
    (ModbusFunction::ReadInputRegisters, handle_read_input_registers),
    (ModbusFunction::ReadHoldingRegisters, handle_read_holding_registers),
    (ModbusFunction::WriteMultipleRegisters, handle_write_multiple_registers),
    (ModbusFunction::WriteSingleRegister, handle_write_single_register),
    (ModbusFunction::ReadWriteMultipleRegisters, handle_read_write_multiple_registers),
    (ModbusFunction::ReadCoils, handle_read_coils),
    (ModbusFunction::WriteSingleCoil, handle_write_single_coil),
    (ModbusFunction::WriteMultipleCoils, handle_write_multiple_coils),
    (ModbusFunction::ReadDiscreteInputs, handle_read_discrete_inputs),
];

/// Look up the handler for a function code byte
pub fn handler_for(code: u8) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(function, _)| function.to_u8() == code)
        .map(|(_, handler)| *handler)
}

/// Decode the resident request and check it is the function being answered
fn resident_request(
    ctx: &HandlerContext<'_>,
    function: ModbusFunction,
) -> Result<Request, ModbusException> {
    let request = Request::decode(ctx.request)?;
    if request.function() != function {
        debug!(
            "response {} does not answer request {}",
            function,
            request.function()
        );
        return Err(ModbusException::IllegalDataValue);
    }
    Ok(request)
}

/// `[fc, byte_count, payload…]` with the expected byte count
fn read_payload(pdu: &[u8], expected: usize) -> Result<&[u8], ModbusException> {
    match pdu {
        [_, byte_count, payload @ ..]
            if *byte_count as usize == expected && payload.len() == expected =>
        {
            Ok(payload)
        }
        _ => {
            trace!(
                "read response of {} bytes, expected byte count {}",
                pdu.len(),
                expected
            );
            Err(ModbusException::IllegalDataValue)
        }
    }
}

#[inline]
fn word(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

// ============================================================================
// Bit access
// ============================================================================

pub fn handle_read_coils(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let Request::ReadCoils { address, count } =
        resident_request(ctx, ModbusFunction::ReadCoils)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let payload = read_payload(pdu, (count as usize).div_ceil(8))?;
    ctx.store
        .coils(ctx.slave, address, count, Access::Write(payload))?;
    Ok(())
}

pub fn handle_read_discrete_inputs(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let Request::ReadDiscreteInputs { address, count } =
        resident_request(ctx, ModbusFunction::ReadDiscreteInputs)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let payload = read_payload(pdu, (count as usize).div_ceil(8))?;
    ctx.store
        .discrete_inputs(ctx.slave, address, count, Access::Write(payload))?;
    Ok(())
}

/// `[05, addr, value]`; value must be `FF 00` or `00 00`
pub fn handle_write_single_coil(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if pdu.len() != 5 {
        return Err(ModbusException::IllegalDataValue);
    }
    let bit = match word(pdu, 3) {
        COIL_ON => 1u8,
        COIL_OFF => 0u8,
        _ => return Err(ModbusException::IllegalDataValue),
    };
    ctx.store
        .coils(ctx.slave, word(pdu, 1), 1, Access::Write(&[bit]))?;
    Ok(())
}

/// The response only echoes address and quantity; values come from the request
pub fn handle_write_multiple_coils(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if pdu.len() != 5 && !ctx.broadcast {
        return Err(ModbusException::IllegalDataValue);
    }
    let Request::WriteMultipleCoils {
        address,
        count,
        values,
    } = resident_request(ctx, ModbusFunction::WriteMultipleCoils)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    if values.len() != (count as usize).div_ceil(8) {
        return Err(ModbusException::IllegalDataValue);
    }
    if !ctx.broadcast && (word(pdu, 1) != address || word(pdu, 3) != count) {
        return Err(ModbusException::IllegalDataValue);
    }
    ctx.store
        .coils(ctx.slave, address, count, Access::Write(&values))?;
    Ok(())
}

// ============================================================================
// 16-bit access
// ============================================================================

pub fn handle_read_holding_registers(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let Request::ReadHoldingRegisters { address, count } =
        resident_request(ctx, ModbusFunction::ReadHoldingRegisters)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let payload = read_payload(pdu, count as usize * 2)?;
    ctx.store
        .holding_registers(ctx.slave, address, count, Access::Write(payload))?;
    Ok(())
}

pub fn handle_read_input_registers(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let Request::ReadInputRegisters { address, count } =
        resident_request(ctx, ModbusFunction::ReadInputRegisters)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let payload = read_payload(pdu, count as usize * 2)?;
    ctx.store
        .input_registers(ctx.slave, address, count, Access::Write(payload))?;
    Ok(())
}

/// `[06, addr, value]` echoed by the slave
pub fn handle_write_single_register(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if pdu.len() != 5 {
        return Err(ModbusException::IllegalDataValue);
    }
    ctx.store
        .holding_registers(ctx.slave, word(pdu, 1), 1, Access::Write(&pdu[3..5]))?;
    Ok(())
}

pub fn handle_write_multiple_registers(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if pdu.len() != 5 && !ctx.broadcast {
        return Err(ModbusException::IllegalDataValue);
    }
    let Request::WriteMultipleRegisters { address, values } =
        resident_request(ctx, ModbusFunction::WriteMultipleRegisters)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let count = values.len() as u16;
    if !ctx.broadcast && (word(pdu, 1) != address || word(pdu, 3) != count) {
        return Err(ModbusException::IllegalDataValue);
    }
    // Values sit behind fc, address, count and byte count
    let payload = &ctx.request[6..6 + values.len() * 2];
    ctx.store
        .holding_registers(ctx.slave, address, count, Access::Write(payload))?;
    Ok(())
}

/// Write part first, then the read payload from the response
pub fn handle_read_write_multiple_registers(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let Request::ReadWriteMultipleRegisters {
        read_address,
        read_count,
        write_address,
        values,
    } = resident_request(ctx, ModbusFunction::ReadWriteMultipleRegisters)?
    else {
        return Err(ModbusException::IllegalDataValue);
    };
    let read = read_payload(pdu, read_count as usize * 2)?;

    let written = &ctx.request[10..10 + values.len() * 2];
    ctx.store.holding_registers(
        ctx.slave,
        write_address,
        values.len() as u16,
        Access::Write(written),
    )?;
    ctx.store
        .holding_registers(ctx.slave, read_address, read_count, Access::Write(read))?;
    Ok(())
}

// ============================================================================
// Diagnostics
// ============================================================================

/// `[11, byte_count, id, run, additional…]`
pub fn handle_report_slave_id(
    ctx: &mut HandlerContext<'_>,
    pdu: &[u8],
) -> Result<(), ModbusException> {
    if ctx.broadcast {
        return Ok(());
    }
    let report = SlaveIdBuffer::from_response(&pdu[PDU_DATA_OFFSET.min(pdu.len())..])
        .map_err(|_| ModbusException::IllegalDataValue)?;
    ctx.store.slave_id(ctx.slave, &report)?;
    Ok(())
}
