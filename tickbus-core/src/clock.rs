//! Programmable clock divisor shared by all line protocol engines.
//!
//! Engines advance one half (or quarter) of a line clock cycle whenever an internal timer,
//! reloaded with the divisor, expires. The achieved line frequency is therefore
//! `sys_clk_hz / (k * (divisor + 1))` where `k` is the number of timer expiries per line
//! clock cycle: 2 for SWD, JTAG and MDIO, 4 for I2C.
use crate::error::ClockError;

pub const MAX_DIVISOR: u16 = u16::MAX;

/// Default accepted deviation between requested and achieved frequency.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct ClockDivisor {
    name: String,
    sys_clk_hz: u32,
    ticks_per_cycle: u32,
    tolerance: f64,
    divisor: u16,
}

impl ClockDivisor {
    /// Creates a divisor for a reference clock of `sys_clk_hz` that needs `ticks_per_cycle`
    /// timer expiries per line clock cycle. The divisor starts at its maximum, the slowest
    /// and therefore safest setting.
    pub fn new(
        name: impl Into<String>,
        sys_clk_hz: u32,
        ticks_per_cycle: u32,
    ) -> Result<ClockDivisor, ClockError> {
        if sys_clk_hz == 0 || ticks_per_cycle == 0 {
            return Err(ClockError::InvalidReference {
                sys_clk_hz,
                ticks_per_cycle,
            });
        }
        Ok(ClockDivisor {
            name: name.into(),
            sys_clk_hz,
            ticks_per_cycle,
            tolerance: DEFAULT_TOLERANCE,
            divisor: MAX_DIVISOR,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Result<ClockDivisor, ClockError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ClockError::InvalidTolerance(tolerance));
        }
        self.tolerance = tolerance;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sys_clk_hz(&self) -> u32 {
        self.sys_clk_hz
    }

    pub fn ticks_per_cycle(&self) -> u32 {
        self.ticks_per_cycle
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    /// Programs a raw divisor, bypassing any tolerance checks.
    pub fn set_divisor(&mut self, divisor: u16) {
        self.divisor = divisor;
    }

    /// The line frequency produced by `divisor`, rounded down.
    pub fn frequency_for(&self, divisor: u16) -> u32 {
        let ticks = u64::from(self.ticks_per_cycle) * (u64::from(divisor) + 1);
        (u64::from(self.sys_clk_hz) / ticks) as u32
    }

    /// The divisor closest to `hz`, clamped to the programmable range.
    /// The resulting frequency may be slightly above `hz`.
    pub fn divisor_for(&self, hz: u32) -> u16 {
        if hz == 0 {
            return MAX_DIVISOR;
        }
        let ticks = u64::from(self.ticks_per_cycle) * u64::from(hz);
        let ratio = (u64::from(self.sys_clk_hz) + ticks / 2) / ticks;
        ratio.saturating_sub(1).min(u64::from(MAX_DIVISOR)) as u16
    }

    pub fn get_frequency(&self) -> u32 {
        self.frequency_for(self.divisor)
    }

    pub fn max_frequency(&self) -> u32 {
        self.frequency_for(0)
    }

    pub fn min_frequency(&self) -> u32 {
        self.frequency_for(MAX_DIVISOR)
    }

    fn exceeds(&self, divisor: u16, hz: u32) -> bool {
        let ticks = u64::from(self.ticks_per_cycle) * (u64::from(divisor) + 1);
        u64::from(self.sys_clk_hz) > u64::from(hz) * ticks
    }

    /// Programs the divisor for the fastest frequency not above `hz` and returns the
    /// achieved frequency.
    ///
    /// Fails without touching the current divisor if `hz` is zero, below the minimum
    /// achievable frequency, or if the achievable frequency deviates by more than the
    /// tolerance.
    pub fn set_frequency(&mut self, hz: u32) -> Result<u32, ClockError> {
        if hz == 0 {
            return Err(ClockError::ZeroFrequency);
        }
        let mut divisor = self.divisor_for(hz);
        if self.exceeds(divisor, hz) {
            if divisor == MAX_DIVISOR {
                return Err(ClockError::BelowMinimum {
                    requested: hz,
                    minimum: self.min_frequency(),
                });
            }
            divisor += 1;
        }
        let achieved = self.frequency_for(divisor);
        let deviation = f64::from(hz - achieved) / f64::from(hz);
        log::debug!(
            "clock {} in={:.3} req={:.3} out={:.3} [kHz] error={:.0} [ppm]",
            self.name,
            f64::from(self.sys_clk_hz) / 1e3,
            f64::from(hz) / 1e3,
            f64::from(achieved) / 1e3,
            deviation * 1e6
        );
        if deviation > self.tolerance {
            log::warn!(
                "clock {}: {} Hz requested, {} Hz achievable",
                self.name,
                hz,
                achieved
            );
            return Err(ClockError::OutOfTolerance {
                requested: hz,
                achieved,
                tolerance: self.tolerance,
            });
        }
        self.divisor = divisor;
        Ok(achieved)
    }
}

/// Reload timer that expires every `divisor + 1` ticks.
///
/// The divisor is latched whenever the timer restarts so a reprogrammed divisor never
/// shortens or extends the half-cycle already in progress.
#[derive(Debug, Clone, Default)]
pub struct HalfCycleTimer {
    count: u16,
    latched: u16,
}

impl HalfCycleTimer {
    /// The limit the running period compares against.
    pub fn limit(&self, divisor: u16) -> u16 {
        if self.count == 0 { divisor } else { self.latched }
    }

    /// True on the last tick of the running period.
    pub fn expired(&self, divisor: u16) -> bool {
        self.count >= self.limit(divisor)
    }

    /// True on the first tick of a period.
    pub fn at_start(&self) -> bool {
        self.count == 0
    }

    /// Advances by one tick. Must only be called while the owning engine is allowed to
    /// make progress.
    pub fn advance(&mut self, divisor: u16) {
        if self.count == 0 {
            self.latched = divisor;
        }
        if self.expired(divisor) {
            self.count = 0;
        } else {
            self.count += 1;
        }
    }

    pub fn restart(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn divisor_formula() {
        let clock = ClockDivisor::new("swd", 100_000_000, 2).unwrap();
        assert_eq!(clock.divisor_for(1_000_000), 49);
        assert_eq!(clock.frequency_for(49), 1_000_000);
        assert_eq!(clock.max_frequency(), 50_000_000);
        assert_eq!(clock.divisor_for(u32::MAX), 0);
        assert_eq!(clock.divisor_for(1), MAX_DIVISOR);
    }

    #[test]
    fn set_frequency_never_exceeds_request() {
        let mut clock = ClockDivisor::new("swd", 100_000_000, 2).unwrap();
        // rounding picks divisor 5 (8.33 MHz), which is above the request
        let achieved = clock.set_frequency(7_812_500).unwrap();
        assert_eq!(clock.divisor(), 6);
        assert_eq!(achieved, 7_142_857);
    }

    #[test]
    fn set_frequency_rejects_invalid_requests() {
        let mut clock = ClockDivisor::new("i2c", 100_000_000, 4).unwrap();
        clock.set_divisor(249);
        assert_eq!(clock.set_frequency(0), Err(ClockError::ZeroFrequency));
        assert!(matches!(
            clock.set_frequency(100),
            Err(ClockError::BelowMinimum { requested: 100, .. })
        ));
        // 30 MHz requested, at most 25 MHz achievable
        assert!(matches!(
            clock.set_frequency(30_000_000),
            Err(ClockError::OutOfTolerance { .. })
        ));
        assert_eq!(clock.divisor(), 249);
        assert_eq!(clock.get_frequency(), 100_000);
    }

    #[test]
    fn invalid_configuration() {
        assert!(ClockDivisor::new("x", 0, 2).is_err());
        assert!(ClockDivisor::new("x", 1, 0).is_err());
        let clock = ClockDivisor::new("x", 1_000, 2).unwrap();
        assert!(clock.clone().with_tolerance(-0.5).is_err());
        assert!(clock.with_tolerance(f64::NAN).is_err());
    }

    #[test]
    fn timer_latches_divisor_per_period() {
        let mut timer = HalfCycleTimer::default();
        let mut expiries = Vec::new();
        for tick in 0..12 {
            // the divisor shrinks in the middle of the first period
            let divisor = if tick < 2 { 4 } else { 1 };
            if timer.expired(divisor) {
                expiries.push(tick);
            }
            timer.advance(divisor);
        }
        assert_eq!(expiries, vec![4, 6, 8, 10]);
    }

    proptest! {
        #[test]
        fn achieved_frequency_is_monotone(a in 10_000u32..50_000_000, b in 10_000u32..50_000_000) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let mut clock = ClockDivisor::new("p", 100_000_000, 2).unwrap().with_tolerance(1.0).unwrap();
            let slow = clock.set_frequency(low).unwrap();
            let fast = clock.set_frequency(high).unwrap();
            prop_assert!(slow <= fast);
            prop_assert!(slow <= low);
            prop_assert!(fast <= high);
        }
    }
}
