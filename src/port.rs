//! # Port Collaborators
//!
//! The master core never touches hardware. Everything platform-specific is
//! reached through the traits in this module:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`EventQueue`] | hand events from callbacks to `main_function` |
//! | [`Resource`] | binary token serializing transactions |
//! | [`Serial`] | byte-level line driver |
//! | [`Timers`] | one-shot timer with three named purposes |
//! | [`CriticalSection`] | short guard around framing-state mutations |
//!
//! A port type implements all five and thereby [`Port`]. In the other
//! direction, the port calls the master's `on_byte_received`,
//! `on_transmitter_empty` and `on_timer_expired` from its interrupt context.
//!
//! The lock-free building blocks [`FlagEventQueue`], [`TokenResource`] and
//! [`FlagSection`] cover the non-hardware half of most ports.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config::TimerConfig;
use crate::protocol::Event;

/// Line direction
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialMode {
    /// Transmitter enabled; the port calls `on_transmitter_empty` until
    /// the line is switched back
    Tx,
    /// Receiver enabled; the port calls `on_byte_received` per byte
    Rx,
}

/// Purpose of the next timer run, bound to a duration by [`TimerConfig`]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Inter-character silence marking a frame boundary
    T35,
    /// Wait for the first byte of a unicast response
    RespondTimeout,
    /// Turnaround after a broadcast
    ConvertDelay,
}

/// Event queue between callback producers and the polling consumer
pub trait EventQueue {
    fn event_init(&mut self) -> bool;
    fn post(&mut self, event: Event) -> bool;
    /// Non-blocking poll
    fn get(&mut self) -> Option<Event>;
}

/// Exclusive transaction token
pub trait Resource {
    fn resource_init(&mut self);
    /// Non-blocking; `false` when already held
    fn take(&mut self) -> bool;
    fn release(&mut self);
}

/// Serial byte driver
pub trait Serial {
    fn serial_init(&mut self) -> bool;
    fn set_mode(&mut self, mode: SerialMode);
    fn get_byte(&mut self) -> Option<u8>;
    fn put_byte(&mut self, byte: u8) -> bool;
}

/// One-shot hardware timer
pub trait Timers {
    fn timers_init(&mut self, config: &TimerConfig) -> bool;
    fn enable(&mut self, mode: TimerMode);
    fn disable(&mut self);
}

/// Short non-blocking guard (interrupt mask, atomic flag, ...)
pub trait CriticalSection {
    fn enter(&mut self);
    fn exit(&mut self);
}

/// Everything the master needs from its platform
pub trait Port: EventQueue + Resource + Serial + Timers + CriticalSection {}

impl<T> Port for T where T: EventQueue + Resource + Serial + Timers + CriticalSection {}

/// Run `f` between `enter` and `exit` of the port's critical section
#[inline]
pub fn with_critical<P, R>(port: &mut P, f: impl FnOnce(&mut P) -> R) -> R
where
    P: CriticalSection + ?Sized,
{
    port.enter();
    let result = f(port);
    port.exit();
    result
}

// ============================================================================
// Lock-free building blocks
// ============================================================================

/// Event queue backed by an atomic bitset
///
/// Posting an event that is already pending is a no-op. Pending events are
/// drained in the order of [`Event::ALL`].
#[derive(Debug, Default)]
pub struct FlagEventQueue {
    pending: AtomicU8,
}

impl FlagEventQueue {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(0),
        }
    }

    pub fn post(&self, event: Event) -> bool {
        self.pending.fetch_or(event.bit(), Ordering::AcqRel);
        true
    }

    pub fn get(&self) -> Option<Event> {
        let pending = self.pending.load(Ordering::Acquire);
        let event = Event::ALL.into_iter().find(|e| pending & e.bit() != 0)?;
        self.pending.fetch_and(!event.bit(), Ordering::AcqRel);
        Some(event)
    }

    pub fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

/// Binary transaction token
#[derive(Debug, Default)]
pub struct TokenResource {
    held: AtomicBool,
}

impl TokenResource {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    pub fn take(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Critical section on an atomic flag
///
/// `enter` spins only while another context is inside, which never lasts
/// longer than one framing-state update.
#[derive(Debug, Default)]
pub struct FlagSection {
    locked: AtomicBool,
}

impl FlagSection {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn enter(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    pub fn exit(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}
