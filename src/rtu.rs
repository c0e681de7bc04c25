//! # RTU Framing Layer
//!
//! Two independent state machines share the frame buffers, the slave address
//! register and the broadcast flag.
//!
//! ## Receive
//!
//! ```text
//! Init ──T35──▶ Idle ──byte──▶ Receiving ──T35──▶ Idle (FrameReceived)
//!                               │  ▲ byte
//!                               └──┘
//!                  Receiving ──overrun──▶ Error ──T35──▶ Idle (ReceiveDataError)
//! ```
//!
//! ## Send
//!
//! ```text
//! Idle ──send()──▶ Transmitting ──last byte──▶ Done ──timer──▶ Idle
//! ```
//!
//! `Done` arms `RespondTimeout` after a unicast and `ConvertDelay` after a
//! broadcast. Expiry of the former is a timeout; expiry of the latter
//! completes the broadcast.

use tracing::{debug, trace, warn};

use crate::config::TransportMode;
use crate::constants::*;
use crate::crc;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::port::{with_critical, Port, SerialMode, TimerMode};
use crate::protocol::{ErrorEvent, SlaveId};
use crate::transport::{FrameSignal, FrameTransport, ReceivedFrame};

/// Receive state machine
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Init,
    Idle,
    Receiving,
    Error,
}

/// Send state machine
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Transmitting,
    Done,
}

/// RTU framing layer
pub struct RtuTransport {
    max_slaves: u8,
    receive_state: ReceiveState,
    send_state: SendState,

    send_buf: [u8; MAX_RTU_FRAME_SIZE],
    send_pdu_len: usize,
    send_pos: usize,
    send_remaining: usize,

    recv_buf: [u8; MAX_RTU_FRAME_SIZE],
    recv_len: usize,

    slave_address: SlaveId,
    broadcast: bool,
}

impl RtuTransport {
    pub fn new(max_slaves: u8) -> Self {
        Self {
            max_slaves,
            receive_state: ReceiveState::Init,
            send_state: SendState::Idle,
            send_buf: [0; MAX_RTU_FRAME_SIZE],
            send_pdu_len: 0,
            send_pos: 0,
            send_remaining: 0,
            recv_buf: [0; MAX_RTU_FRAME_SIZE],
            recv_len: 0,
            slave_address: BROADCAST_ADDRESS,
            broadcast: false,
        }
    }

    #[inline]
    pub fn receive_state(&self) -> ReceiveState {
        self.receive_state
    }

    #[inline]
    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    /// Bytes buffered by the receive state machine
    #[inline]
    pub fn received(&self) -> &[u8] {
        &self.recv_buf[..self.recv_len]
    }
}

impl<P: Port> FrameTransport<P> for RtuTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Rtu
    }

    fn start(&mut self, port: &mut P) {
        with_critical(port, |port| {
            self.send_state = SendState::Idle;
            self.receive_state = ReceiveState::Init;
            port.set_mode(SerialMode::Rx);
            port.enable(TimerMode::T35);
        });
        debug!("RTU framing started");
    }

    fn stop(&mut self, port: &mut P) {
        with_critical(port, |port| {
            port.set_mode(SerialMode::Rx);
            port.disable();
        });
        debug!("RTU framing stopped");
    }

    fn receive(&self) -> ModbusResult<ReceivedFrame<'_>> {
        let frame = self.received();
        if !crc::is_valid(frame) {
            log_packet("reject", frame, "RTU", None);
            return Err(ModbusError::io(format!(
                "invalid RTU frame: {} bytes, crc {:04X}",
                frame.len(),
                crc::crc16(frame)
            )));
        }
        log_packet("receive", frame, "RTU", Some(frame[RTU_ADDRESS_OFFSET]));

        Ok(ReceivedFrame {
            address: frame[RTU_ADDRESS_OFFSET],
            pdu: &frame[RTU_PDU_OFFSET..frame.len() - RTU_CRC_SIZE],
        })
    }

    fn send(&mut self, port: &mut P, address: SlaveId, pdu_len: usize) -> ModbusResult<()> {
        if address > self.max_slaves {
            return Err(ModbusError::invalid_argument(format!(
                "slave address {} above {}",
                address, self.max_slaves
            )));
        }
        if pdu_len == 0 || pdu_len > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_argument(format!(
                "PDU length {} outside 1..={}",
                pdu_len, MAX_PDU_SIZE
            )));
        }

        with_critical(port, |port| {
            // Receiver still busy: the bus already carries other traffic
            if self.receive_state != ReceiveState::Idle {
                return Err(ModbusError::io(format!(
                    "receiver not idle ({:?})",
                    self.receive_state
                )));
            }

            self.send_buf[RTU_ADDRESS_OFFSET] = address;
            let frame_len = crc::append_crc(&mut self.send_buf, RTU_PDU_OFFSET + pdu_len)
                .ok_or_else(|| ModbusError::insufficient_resources("send buffer full"))?;

            self.send_pos = 0;
            self.send_remaining = frame_len;
            self.send_state = SendState::Transmitting;
            log_packet("send", &self.send_buf[..frame_len], "RTU", Some(address));

            port.set_mode(SerialMode::Tx);
            Ok(())
        })
    }

    fn slave_address(&self) -> SlaveId {
        self.slave_address
    }

    fn set_slave_address(&mut self, address: SlaveId) {
        self.slave_address = address;
    }

    fn send_pdu(&self) -> &[u8] {
        &self.send_buf[RTU_PDU_OFFSET..RTU_PDU_OFFSET + self.send_pdu_len]
    }

    fn send_pdu_mut(&mut self) -> &mut [u8] {
        &mut self.send_buf[RTU_PDU_OFFSET..RTU_PDU_OFFSET + MAX_PDU_SIZE]
    }

    fn set_send_len(&mut self, len: usize) {
        self.send_pdu_len = len.min(MAX_PDU_SIZE);
    }

    fn send_len(&self) -> usize {
        self.send_pdu_len
    }

    fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    fn on_byte_received(&mut self, port: &mut P) -> Option<FrameSignal> {
        let Some(byte) = port.get_byte() else {
            trace!("receive callback without data");
            return None;
        };

        match self.receive_state {
            // Line not yet silent for T3.5: keep waiting
            ReceiveState::Init | ReceiveState::Error => {
                port.enable(TimerMode::T35);
            }
            ReceiveState::Idle => {
                // A slave answered: the respond timeout no longer applies
                port.disable();
                self.send_state = SendState::Idle;

                self.recv_len = 0;
                self.recv_buf[self.recv_len] = byte;
                self.recv_len += 1;
                self.receive_state = ReceiveState::Receiving;
                port.enable(TimerMode::T35);
            }
            ReceiveState::Receiving => {
                if self.recv_len < MAX_RTU_FRAME_SIZE {
                    self.recv_buf[self.recv_len] = byte;
                    self.recv_len += 1;
                } else {
                    warn!("RTU frame overrun at {} bytes", self.recv_len);
                    self.receive_state = ReceiveState::Error;
                }
                port.enable(TimerMode::T35);
            }
        }
        None
    }

    fn on_transmitter_empty(&mut self, port: &mut P) -> Option<FrameSignal> {
        match self.send_state {
            SendState::Idle => {
                port.set_mode(SerialMode::Rx);
            }
            SendState::Transmitting => {
                if self.send_remaining != 0 {
                    port.put_byte(self.send_buf[self.send_pos]);
                    self.send_pos += 1;
                    self.send_remaining -= 1;
                } else {
                    self.broadcast = self.send_buf[RTU_ADDRESS_OFFSET] == BROADCAST_ADDRESS;
                    port.set_mode(SerialMode::Rx);
                    self.send_state = SendState::Done;
                    port.enable(if self.broadcast {
                        TimerMode::ConvertDelay
                    } else {
                        TimerMode::RespondTimeout
                    });
                }
            }
            SendState::Done => {}
        }
        None
    }

    fn on_timer_expired(&mut self, port: &mut P) -> Option<FrameSignal> {
        let received = match self.receive_state {
            ReceiveState::Init => Some(FrameSignal::Ready),
            ReceiveState::Receiving => Some(FrameSignal::FrameReceived),
            ReceiveState::Error => Some(FrameSignal::Failed(ErrorEvent::ReceiveDataError)),
            ReceiveState::Idle => None,
        };
        self.receive_state = ReceiveState::Idle;

        let sent = match self.send_state {
            SendState::Done if self.broadcast => Some(FrameSignal::BroadcastComplete),
            SendState::Done => Some(FrameSignal::Failed(ErrorEvent::RespondTimeout)),
            _ => None,
        };
        self.send_state = SendState::Idle;
        port.disable();

        received.or(sent)
    }
}
