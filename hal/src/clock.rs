//! # Clock Control
//!
//! Clock handles and the operations a clock-tree driver exposes to modules.

use core::fmt;

use static_assertions::assert_eq_size;

use crate::error::HalResult;

// =============================================================================
// FREQUENCY
// =============================================================================

/// A clock frequency in hertz
///
/// A zero rate never names a real operating point; the rate registry uses it
/// to mean "no vote".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hertz(pub u64);

assert_eq_size!(Hertz, u64);

impl Hertz {
    /// No frequency
    pub const ZERO: Hertz = Hertz(0);

    /// Is this the zero rate?
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Hertz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

// =============================================================================
// CLOCK HANDLE
// =============================================================================

/// Opaque handle to a clock obtained from [`ClockControl::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockId(pub u32);

// =============================================================================
// CLOCK CONTROL
// =============================================================================

/// Clock-tree operations
///
/// `enable`/`disable` nest: a clock stays running until every enable has been
/// matched by a disable.
pub trait ClockControl: Send + Sync {
    /// Look up the clock `name` belonging to `device`
    fn get(&self, device: &str, name: &str) -> HalResult<ClockId>;

    /// Release a handle obtained from [`get`](Self::get)
    fn put(&self, clock: ClockId);

    /// Ungate the clock
    fn enable(&self, clock: ClockId);

    /// Gate the clock
    fn disable(&self, clock: ClockId);

    /// Current output rate
    fn rate(&self, clock: ClockId) -> Hertz;

    /// Closest rate the clock can actually produce for `rate`
    fn round_rate(&self, clock: ClockId, rate: Hertz) -> Hertz;

    /// Reprogram the clock
    fn set_rate(&self, clock: ClockId, rate: Hertz) -> HalResult<()>;
}
