//! # ACM Error Handling
//!
//! Recoverable failures surfaced to callers. Broken invariants (refcount
//! underflow, idling an unpowered module, a module still powered after
//! suspend) are not represented here: they panic, and the release profile
//! turns that panic into an abort.

use core::fmt;

use helix_hal::HalError;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// ACM result alias
pub type AcmResult<T> = core::result::Result<T, AcmError>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Errors returned by the clock management engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcmError {
    /// Client bookkeeping could not be allocated
    OutOfMemory,
    /// Clock index not backed by a clock of this module
    InvalidArgument,
    /// Module id does not name a live module
    NoSuchModule,
    /// Descriptor lists more clocks than a module can hold
    TooManyClocks,
    /// Parent id does not name a live module
    InvalidParent,
    /// Module still sponsors live children
    HasChildren,
    /// Board primitive failed
    Hal(HalError),
}

impl fmt::Display for AcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NoSuchModule => write!(f, "no such module"),
            Self::TooManyClocks => write!(f, "too many clocks for one module"),
            Self::InvalidParent => write!(f, "invalid parent module"),
            Self::HasChildren => write!(f, "module still has children"),
            Self::Hal(e) => write!(f, "hardware error: {}", e),
        }
    }
}

impl std::error::Error for AcmError {}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<HalError> for AcmError {
    fn from(e: HalError) -> Self {
        AcmError::Hal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_conversion() {
        let err: AcmError = HalError::RateUnsupported.into();
        assert_eq!(err, AcmError::Hal(HalError::RateUnsupported));
        assert_eq!(err.to_string(), "hardware error: clock rate not supported");
    }
}
