//! # Master Configuration
//!
//! [`MasterConfig`] selects the framing variant and binds the platform-facing
//! parameters: how many slaves exist, how long each named timer runs, and the
//! per-request count limits.
//!
//! ## Timers
//!
//! | Purpose | Default |
//! |---------|---------|
//! | `T35` inter-character silence | 5 ms |
//! | `RespondTimeout` | 100 ms |
//! | `ConvertDelay` after broadcast | 200 ms |
//!
//! The whole [`TimerConfig`] is handed to the port's `timers_init`, and
//! `TimerConfig::duration` is the single place mapping a [`TimerMode`] to its
//! duration.

use std::time::Duration;

use crate::constants::{DEFAULT_SLAVE_COUNT, MAX_SLAVE_ADDRESS};
use crate::device_limits::DeviceLimits;
use crate::error::{ModbusError, ModbusResult};
use crate::port::TimerMode;

/// Default T3.5 when not derived from the baud rate
pub const DEFAULT_T35: Duration = Duration::from_millis(5);

/// Default wait for a unicast response
pub const DEFAULT_RESPOND_TIMEOUT: Duration = Duration::from_millis(100);

/// Default turnaround after a broadcast
pub const DEFAULT_CONVERT_DELAY: Duration = Duration::from_millis(200);

/// Above this rate T3.5 is fixed at 1750 us
const FIXED_T35_BAUD: u32 = 19_200;
const FIXED_T35: Duration = Duration::from_micros(1_750);

/// Framing variant
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Rtu,
    Ascii,
    Tcp,
}

/// Durations bound to each [`TimerMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub t35: Duration,
    pub respond_timeout: Duration,
    pub convert_delay: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            t35: DEFAULT_T35,
            respond_timeout: DEFAULT_RESPOND_TIMEOUT,
            convert_delay: DEFAULT_CONVERT_DELAY,
        }
    }
}

impl TimerConfig {
    /// Defaults with T3.5 derived from the line speed
    ///
    /// 3.5 characters of 11 bits up to 19200 baud, 1750 us above.
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        let t35 = match baud_rate {
            0 => Duration::ZERO,
            b if b > FIXED_T35_BAUD => FIXED_T35,
            b => Duration::from_micros(38_500_000 / b as u64),
        };
        Self {
            t35,
            ..Self::default()
        }
    }

    pub fn with_t35(mut self, t35: Duration) -> Self {
        self.t35 = t35;
        self
    }

    pub fn with_respond_timeout(mut self, timeout: Duration) -> Self {
        self.respond_timeout = timeout;
        self
    }

    pub fn with_convert_delay(mut self, delay: Duration) -> Self {
        self.convert_delay = delay;
        self
    }

    /// Duration the port must run for `mode`
    #[inline]
    pub fn duration(&self, mode: TimerMode) -> Duration {
        match mode {
            TimerMode::T35 => self.t35,
            TimerMode::RespondTimeout => self.respond_timeout,
            TimerMode::ConvertDelay => self.convert_delay,
        }
    }

    pub fn validate(&self) -> ModbusResult<()> {
        for mode in [
            TimerMode::T35,
            TimerMode::RespondTimeout,
            TimerMode::ConvertDelay,
        ] {
            if self.duration(mode).is_zero() {
                return Err(ModbusError::invalid_argument(format!(
                    "timer {:?} has zero duration",
                    mode
                )));
            }
        }
        Ok(())
    }
}

/// Master configuration
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_modbus_master::{MasterConfig, TimerConfig};
///
/// let config = MasterConfig::new()
///     .with_max_slaves(4)
///     .with_timers(TimerConfig::for_baud_rate(9600).with_respond_timeout(Duration::from_millis(250)));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    pub mode: TransportMode,
    /// Slaves are addressed 1..=max_slaves
    pub max_slaves: u8,
    pub timers: TimerConfig,
    pub limits: DeviceLimits,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Rtu,
            max_slaves: DEFAULT_SLAVE_COUNT,
            timers: TimerConfig::default(),
            limits: DeviceLimits::default(),
        }
    }
}

impl MasterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_slaves(mut self, max_slaves: u8) -> Self {
        self.max_slaves = max_slaves;
        self
    }

    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.max_slaves == 0 || self.max_slaves > MAX_SLAVE_ADDRESS {
            return Err(ModbusError::invalid_argument(format!(
                "max_slaves {} outside 1..={}",
                self.max_slaves, MAX_SLAVE_ADDRESS
            )));
        }
        self.timers.validate()?;
        self.limits.validate()
    }
}
