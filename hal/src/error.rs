//! # HAL Errors

use core::fmt;

/// HAL result alias
pub type HalResult<T> = core::result::Result<T, HalError>;

/// Failures reported by the board primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// No clock with the requested device/name pair
    NoSuchClock,
    /// The clock cannot run at the requested rate
    RateUnsupported,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchClock => write!(f, "no such clock"),
            Self::RateUnsupported => write!(f, "clock rate not supported"),
        }
    }
}
