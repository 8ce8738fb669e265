//! # Helix ACM - Automatic Clock Management
//!
//! Keeps host modules powered exactly as long as somebody uses them.
//!
//! ```text
//!   caller threads                         scheduler thread
//!   ──────────────                         ────────────────
//!   busy(m) ──▶ refcount 0→1 ──▶ parent busy, ungate, clocks on
//!   idle(m) ──▶ refcount →0  ──▶ arm power-down ────▶ prepare_poweroff?
//!                                        ▲                 │ busy: retry
//!                                        └─────────────────┘
//!                                                          │ ok: clocks off,
//!                                                          ▼ gate, parent idle
//! ```
//!
//! ## Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Host | [`host`] | Module table, registration, queries |
//! | Power coordinator | [`power`] | busy/idle, deferred power-down, reset |
//! | Client rate registry | [`clients`] | Per-clock votes, max wins |
//! | Suspend coordination | [`suspend`] | Bounded wait, flush, teardown |
//! | Deferred work | [`workqueue`] | Cancellable one-shot timers |
//! | Diagnostics | [`diagnostics`] | Not-idle reports, resource locks |
//!
//! Hardware is reached only through [`helix_hal::Platform`].
//!
//! ## Invariants
//!
//! - A module with users is powered, and so is its parent.
//! - Power-down never runs while a module has users.
//! - A clock's rate is the highest client vote, or its default without one.
//!
//! Breaking a refcount invariant is a driver bug and panics.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unsafe_code)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

use static_assertions::{assert_impl_all, const_assert};

/// Log at error level, then panic with the same message
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Client rate votes
pub mod clients;

/// Host configuration
pub mod config;

/// Static module descriptions
pub mod descriptor;

/// Not-idle reporting
pub mod diagnostics;

/// Error types
pub mod error;

/// Module table
pub mod host;

/// Module instances and power phases
pub mod module;

/// Busy/idle state machine
pub mod power;

/// Suspend and teardown
pub mod suspend;

/// Deferred work queues
pub mod workqueue;

/// Simulated platform and test rig
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use clients::{ClientRecord, ClientRegistry, ClientToken};
pub use config::AcmConfig;
pub use descriptor::{ClockSpec, ModuleDescriptor, ModuleFlags, ModuleHooks, NoHooks};
pub use diagnostics::{DiagnosticsSink, IdleReport, LogDiagnostics, ModuleReport, ResourceLocks};
pub use error::{AcmError, AcmResult};
pub use host::Host;
pub use module::{ModuleId, ModuleInfo, ModuleInstance, PowerPhase};
pub use workqueue::{ManualWorkQueue, ThreadWorkQueue, WorkFn, WorkId, WorkQueue};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Most clocks a module may run from
pub const MAX_CLOCKS: usize = 4;

/// Size of a clock device-id buffer, terminator included
pub const MAX_DEVID_LENGTH: usize = 16;

const_assert!(MAX_CLOCKS > 0);
const_assert!(MAX_DEVID_LENGTH > 1);

assert_impl_all!(Host: Send, Sync);
assert_impl_all!(ModuleInstance: Send, Sync);
assert_impl_all!(ManualWorkQueue: Send, Sync);
assert_impl_all!(ThreadWorkQueue: Send, Sync);
assert_impl_all!(AcmError: Send, Sync, Copy);
