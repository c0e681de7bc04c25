//! Report Slave ID (FC17) payload
//!
//! Layout: `[id, run indicator (0xFF on / 0x00 off), additional bytes…]`,
//! bounded by [`SLAVE_ID_BUFFER_SIZE`].

use crate::constants::{FC_REPORT_SLAVE_ID, SLAVE_ID_BUFFER_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

const RUN_INDICATOR_ON: u8 = 0xFF;
const RUN_INDICATOR_OFF: u8 = 0x00;

/// Fixed-capacity identification buffer
#[derive(Clone, PartialEq, Eq)]
pub struct SlaveIdBuffer {
    data: [u8; SLAVE_ID_BUFFER_SIZE],
    len: usize,
}

impl SlaveIdBuffer {
    /// Build an identification record.
    ///
    /// Fails with `InsufficientResources` unless `additional.len() + 2` is
    /// strictly below the buffer capacity.
    pub fn new(id: u8, running: bool, additional: &[u8]) -> ModbusResult<Self> {
        if additional.len() + 2 >= SLAVE_ID_BUFFER_SIZE {
            return Err(ModbusError::insufficient_resources(format!(
                "slave id additional data too long: {} bytes (max {})",
                additional.len(),
                SLAVE_ID_BUFFER_SIZE - 3
            )));
        }

        let mut data = [0u8; SLAVE_ID_BUFFER_SIZE];
        data[0] = id;
        data[1] = if running {
            RUN_INDICATOR_ON
        } else {
            RUN_INDICATOR_OFF
        };
        data[2..2 + additional.len()].copy_from_slice(additional);

        Ok(Self {
            data,
            len: 2 + additional.len(),
        })
    }

    /// Parse the data section of an FC17 response: `[byte_count, id, run, additional…]`
    pub fn from_response(data: &[u8]) -> ModbusResult<Self> {
        let (&byte_count, rest) = data
            .split_first()
            .ok_or_else(|| ModbusError::invalid_argument("empty report slave id response"))?;
        let byte_count = byte_count as usize;
        if byte_count < 2 || byte_count != rest.len() {
            return Err(ModbusError::invalid_argument(format!(
                "report slave id byte count {} does not match payload of {} bytes",
                byte_count,
                rest.len()
            )));
        }
        // Any non-zero run indicator counts as running
        Self::new(rest[0], rest[1] != RUN_INDICATOR_OFF, &rest[2..])
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.data[0]
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.data[1] == RUN_INDICATOR_ON
    }

    #[inline]
    pub fn additional(&self) -> &[u8] {
        &self.data[2..self.len]
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true; kept for API symmetry with slices
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the buffer verbatim behind the FC17 function code
    pub fn write_response(&self, pdu: &mut ModbusPdu) -> ModbusResult<()> {
        pdu.clear();
        pdu.push(FC_REPORT_SLAVE_ID)?;
        pdu.extend(self.as_slice())
    }
}

impl std::fmt::Debug for SlaveIdBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveIdBuffer")
            .field("id", &self.id())
            .field("running", &self.is_running())
            .field("additional", &self.additional())
            .finish()
    }
}
