//! In-memory port for tests and host-side simulation
//!
//! Records every serial, timer, event and resource interaction so scenarios
//! can be driven byte by byte and asserted on afterwards.

use std::collections::VecDeque;

use crate::config::TimerConfig;
use crate::port::{
    CriticalSection, EventQueue, FlagSection, Resource, Serial, SerialMode, TimerMode, Timers,
    TokenResource,
};
use crate::protocol::Event;

/// Scriptable port
#[derive(Debug, Default)]
pub struct MockPort {
    /// FIFO event queue
    pub events: VecDeque<Event>,
    pub token: TokenResource,
    pub section: FlagSection,
    /// Number of critical sections entered so far
    pub critical_entries: usize,

    /// Bytes waiting to be returned by `get_byte`
    pub rx: VecDeque<u8>,
    /// Bytes written with `put_byte`
    pub tx: Vec<u8>,
    pub mode: Option<SerialMode>,

    /// Running timer, if any
    pub timer: Option<TimerMode>,
    /// Every `enable` call in order
    pub timer_log: Vec<TimerMode>,
    pub timer_config: Option<TimerConfig>,

    pub fail_serial_init: bool,
    pub fail_timers_init: bool,
    pub fail_event_init: bool,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_critical(&self) -> bool {
        self.section.is_locked()
    }

    /// Queue bytes for reception
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Take everything transmitted so far
    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl EventQueue for MockPort {
    fn event_init(&mut self) -> bool {
        self.events.clear();
        !self.fail_event_init
    }

    fn post(&mut self, event: Event) -> bool {
        self.events.push_back(event);
        true
    }

    fn get(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl Resource for MockPort {
    fn resource_init(&mut self) {
        self.token.release();
    }

    fn take(&mut self) -> bool {
        self.token.take()
    }

    fn release(&mut self) {
        self.token.release();
    }
}

impl Serial for MockPort {
    fn serial_init(&mut self) -> bool {
        !self.fail_serial_init
    }

    fn set_mode(&mut self, mode: SerialMode) {
        self.mode = Some(mode);
    }

    fn get_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn put_byte(&mut self, byte: u8) -> bool {
        self.tx.push(byte);
        true
    }
}

impl Timers for MockPort {
    fn timers_init(&mut self, config: &TimerConfig) -> bool {
        self.timer_config = Some(*config);
        !self.fail_timers_init
    }

    fn enable(&mut self, mode: TimerMode) {
        self.timer = Some(mode);
        self.timer_log.push(mode);
    }

    fn disable(&mut self) {
        self.timer = None;
    }
}

impl CriticalSection for MockPort {
    fn enter(&mut self) {
        self.section.enter();
        self.critical_entries += 1;
    }

    fn exit(&mut self) {
        self.section.exit();
    }
}
