use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
pub enum ClockError {
    /// The reference clock or the per-cycle tick count is zero.
    InvalidReference { sys_clk_hz: u32, ticks_per_cycle: u32 },
    /// Tolerance must be a finite, non-negative fraction.
    InvalidTolerance(f64),
    ZeroFrequency,
    /// Even the largest divisor produces a frequency above the request.
    BelowMinimum { requested: u32, minimum: u32 },
    /// The closest achievable frequency deviates by more than the configured tolerance.
    OutOfTolerance {
        requested: u32,
        achieved: u32,
        tolerance: f64,
    },
}

impl Display for ClockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::InvalidReference {
                sys_clk_hz,
                ticks_per_cycle,
            } => write!(
                f,
                "Invalid clock reference: {sys_clk_hz} Hz with {ticks_per_cycle} ticks per cycle"
            ),
            ClockError::InvalidTolerance(tolerance) => {
                write!(f, "Invalid clock tolerance {tolerance}")
            }
            ClockError::ZeroFrequency => write!(f, "Cannot set a frequency of 0 Hz"),
            ClockError::BelowMinimum { requested, minimum } => write!(
                f,
                "Requested {requested} Hz is below the minimum frequency of {minimum} Hz"
            ),
            ClockError::OutOfTolerance {
                requested,
                achieved,
                tolerance,
            } => write!(
                f,
                "Requested {requested} Hz, closest achievable is {achieved} Hz (tolerance {:.1}%)",
                tolerance * 100.0
            ),
        }
    }
}

impl Error for ClockError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    /// An entry is not of the form `name=pin`.
    MalformedEntry(String),
    /// A pin is not of the form `<bank><index>`, e.g. `A3`.
    InvalidPin(String),
    DuplicateName(String),
    /// Two names are bound to the same physical pin.
    DuplicatePin(String),
    MissingName(String),
}

impl Display for PinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::MalformedEntry(entry) => {
                write!(f, "Malformed pin assignment '{entry}', expected name=pin")
            }
            PinError::InvalidPin(pin) => write!(f, "Invalid pin '{pin}'"),
            PinError::DuplicateName(name) => write!(f, "Signal '{name}' is assigned twice"),
            PinError::DuplicatePin(pin) => write!(f, "Pin {pin} is assigned twice"),
            PinError::MissingName(name) => write!(f, "No pin assigned to signal '{name}'"),
        }
    }
}

impl Error for PinError {}
