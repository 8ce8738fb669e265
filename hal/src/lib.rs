//! # Helix HAL - Module Power Primitives
//!
//! The hardware-facing half of automatic clock management. A host module
//! never touches clock-tree or power-rail registers directly; it goes through
//! the traits defined here, which a board support layer implements.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                   Platform                     │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────┐ │
//! │  │ ClockControl │ │ PowerGate    │ │ Reset  │ │
//! │  │ enable/rate  │ │ gate/mc flush│ │ assert │ │
//! │  └──────────────┘ └──────────────┘ └────────┘ │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Every primitive is infallible except clock lookup and rate changes: the
//! underlying controllers either accept the request or the board is broken.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod clock;
pub mod error;
pub mod powergate;
pub mod reset;

pub use clock::{ClockControl, ClockId, Hertz};
pub use error::{HalError, HalResult};
pub use powergate::{PartitionId, PowerGateControl};
pub use reset::ResetControl;

// =============================================================================
// PLATFORM
// =============================================================================

/// Everything a host module needs from the board
///
/// Implementations must be shareable between the caller threads driving
/// busy/idle and the scheduler thread running deferred power-down.
pub trait Platform: ClockControl + PowerGateControl + ResetControl {
    /// Busy-wait for at least `us` microseconds
    fn udelay(&self, us: u32);
}
