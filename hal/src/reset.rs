//! # Reset Lines

use crate::clock::ClockId;

/// Peripheral reset lines, addressed by the clock that feeds the peripheral
pub trait ResetControl: Send + Sync {
    /// Hold the peripheral in reset
    fn assert_reset(&self, clock: ClockId);

    /// Release the peripheral from reset
    fn deassert_reset(&self, clock: ClockId);
}
