//! # Framing Transport Abstraction
//!
//! [`FrameTransport`] is the set of callouts the dispatcher uses to drive a
//! framing layer: start/stop, send/receive, addressing, send-buffer access and
//! the broadcast flag, plus the three byte/timer callbacks the port invokes.
//!
//! The variant is chosen once, in [`new_transport`], from
//! [`TransportMode`]. RTU is implemented by [`RtuTransport`]; ASCII and TCP
//! are integration points only and are refused at init.
//!
//! Callbacks never post events themselves. They return a [`FrameSignal`] and
//! the dispatcher turns it into queue events, so a transport holds no
//! reference to the event queue.

use crate::config::TransportMode;
use crate::error::{ModbusError, ModbusResult};
use crate::port::Port;
use crate::protocol::{ErrorEvent, SlaveId};
use crate::rtu::RtuTransport;

/// Outcome of a framing callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSignal {
    /// Startup guard interval elapsed
    Ready,
    /// A frame is buffered and waiting for `receive`
    FrameReceived,
    /// The exchange failed
    Failed(ErrorEvent),
    /// Turnaround after a broadcast elapsed; the request PDU is final
    BroadcastComplete,
}

/// A frame accepted by `receive`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame<'a> {
    pub address: SlaveId,
    /// Function code and data, without address and CRC
    pub pdu: &'a [u8],
}

/// Callouts of a framing layer
pub trait FrameTransport<P: Port> {
    fn mode(&self) -> TransportMode;

    /// Arm the receive state machine
    fn start(&mut self, port: &mut P);

    fn stop(&mut self, port: &mut P);

    /// Validate and expose the buffered frame
    fn receive(&self) -> ModbusResult<ReceivedFrame<'_>>;

    /// Transmit the first `pdu_len` bytes of the send PDU to `address`
    fn send(&mut self, port: &mut P, address: SlaveId, pdu_len: usize) -> ModbusResult<()>;

    fn slave_address(&self) -> SlaveId;

    fn set_slave_address(&mut self, address: SlaveId);

    /// The loaded request PDU
    fn send_pdu(&self) -> &[u8];

    /// Whole PDU area of the send buffer
    fn send_pdu_mut(&mut self) -> &mut [u8];

    fn set_send_len(&mut self, len: usize);

    fn send_len(&self) -> usize;

    /// Whether the last transmitted frame went to the broadcast address
    fn is_broadcast(&self) -> bool;

    fn on_byte_received(&mut self, port: &mut P) -> Option<FrameSignal>;

    fn on_transmitter_empty(&mut self, port: &mut P) -> Option<FrameSignal>;

    fn on_timer_expired(&mut self, port: &mut P) -> Option<FrameSignal>;
}

/// Build the framing layer for `mode`
pub fn new_transport<P: Port>(
    mode: TransportMode,
    max_slaves: u8,
) -> ModbusResult<Box<dyn FrameTransport<P>>> {
    match mode {
        TransportMode::Rtu => Ok(Box::new(RtuTransport::new(max_slaves))),
        TransportMode::Ascii => Err(ModbusError::invalid_argument(
            "ASCII framing is not available in this build",
        )),
        TransportMode::Tcp => Err(ModbusError::invalid_argument(
            "TCP framing is not available in this build",
        )),
    }
}
