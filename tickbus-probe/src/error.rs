use std::{error::Error, fmt::Display};
use tickbus_core::{ClockError, PinError};

/// Errors that may occur while configuring an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    Clock(ClockError),
    Pins(PinError),
}

impl From<ClockError> for ProbeError {
    fn from(value: ClockError) -> Self {
        ProbeError::Clock(value)
    }
}

impl From<PinError> for ProbeError {
    fn from(value: PinError) -> Self {
        ProbeError::Pins(value)
    }
}

impl Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Clock(error) => write!(f, "{}", error),
            ProbeError::Pins(error) => write!(f, "{}", error),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Clock(error) => Some(error),
            ProbeError::Pins(error) => Some(error),
        }
    }
}
