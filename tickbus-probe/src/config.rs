use crate::error::ProbeError;
use tickbus_core::bus::Bus;
use tickbus_core::clock::{ClockDivisor, DEFAULT_TOLERANCE};
use tickbus_core::pins::PinMap;

/// Settings shared by every engine in this crate.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frequency of the reference clock that advances every tick.
    pub sys_clk_hz: u32,
    /// Requested line clock frequency.
    pub frequency: u32,
    /// Accepted relative deviation from `frequency`.
    pub tolerance: f64,
    /// How often a `WAIT` acknowledgement is retried before it is reported.
    pub timeout: u16,
    /// Honour targets holding SCL low.
    pub clock_stretch: bool,
    /// Physical pins for the engine's signals. Left unbound if absent.
    pub pins: Option<PinMap>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sys_clk_hz: 48_000_000,
            frequency: 1_000_000,
            tolerance: DEFAULT_TOLERANCE,
            timeout: u16::MAX,
            clock_stretch: true,
            pins: None,
        }
    }
}

impl Config {
    /// Derives the divisor of a line clock needing `ticks_per_cycle` timer expiries per cycle.
    pub fn clock(&self, name: &str, ticks_per_cycle: u32) -> Result<ClockDivisor, ProbeError> {
        let mut clock =
            ClockDivisor::new(name, self.sys_clk_hz, ticks_per_cycle)?.with_tolerance(self.tolerance)?;
        clock.set_frequency(self.frequency)?;
        Ok(clock)
    }

    /// Binds `bus` to the configured pins, if any.
    pub fn bind<const N: usize>(&self, mut bus: Bus<N>) -> Result<Bus<N>, ProbeError> {
        if let Some(pins) = &self.pins {
            bus.bind(pins)?;
        }
        Ok(bus)
    }
}

/// An engine that can be created from a [`Config`].
pub trait Configure: Sized {
    fn configure(config: &Config) -> Result<Self, ProbeError>;
}

/// Builder to create an engine and modify configuration options
///
/// # Example
///
/// ```
/// use tickbus_probe::config::Builder;
/// use tickbus_probe::swd;
///
/// let controller: swd::Controller = Builder::new()
///     .frequency(4_000_000)
///     .timeout(16)
///     .build()
///     .unwrap();
/// assert_eq!(controller.timeout(), 16);
/// assert_eq!(controller.frequency(), 4_000_000);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn sys_clk_hz(mut self, hz: u32) -> Self {
        self.config.sys_clk_hz = hz;
        self
    }

    /// Set the requested line clock frequency
    pub fn frequency(mut self, hz: u32) -> Self {
        self.config.frequency = hz;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Set the number of retries of a transfer acknowledged with `WAIT`
    pub fn timeout(mut self, timeout: u16) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn clock_stretch(mut self, enabled: bool) -> Self {
        self.config.clock_stretch = enabled;
        self
    }

    pub fn pins(mut self, pins: PinMap) -> Self {
        self.config.pins = Some(pins);
        self
    }

    pub fn config(self) -> Config {
        self.config
    }

    /// Build and return the engine
    pub fn build<E: Configure>(self) -> Result<E, ProbeError> {
        E::configure(&self.config)
    }
}
