//! # Module Instances
//!
//! A module instance is one live copy of a [`ModuleDescriptor`]: the clock
//! handles it acquired, its place in the hierarchy, and the mutable power
//! state guarded by its lock.
//!
//! ```text
//!            busy (0 -> 1)
//!   ┌─────┐ ─────────────▶ ┌────────┐
//!   │ Off │                │ Active │ ◀─┐ busy (cancels
//!   └─────┘ ◀──┐           └────────┘   │  power-down)
//!              │  idle (-> 0) │         │
//!   power-down │              ▼         │
//!   completes  │        ┌─────────────┐ │
//!              └─────── │ IdlePending │─┘
//!                       └─────────────┘
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use arrayvec::ArrayVec;
use helix_hal::ClockId;

use crate::descriptor::{ModuleDescriptor, ModuleHooks};
use crate::workqueue::WorkId;
use crate::MAX_CLOCKS;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable index of a module in its host's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

// =============================================================================
// MODULE INFO
// =============================================================================

/// The immutable half of a module, handed to hooks
#[derive(Debug)]
pub struct ModuleInfo {
    id: ModuleId,
    name: String,
    parent: Option<ModuleId>,
    descriptor: Arc<ModuleDescriptor>,
    clocks: ArrayVec<ClockId, MAX_CLOCKS>,
}

impl ModuleInfo {
    pub(crate) fn new(
        id: ModuleId,
        name: String,
        parent: Option<ModuleId>,
        descriptor: Arc<ModuleDescriptor>,
        clocks: ArrayVec<ClockId, MAX_CLOCKS>,
    ) -> Self {
        Self {
            id,
            name,
            parent,
            descriptor,
            clocks,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        Self::new(
            ModuleId(usize::MAX),
            String::from(name),
            None,
            Arc::new(ModuleDescriptor::new(Duration::ZERO)),
            ArrayVec::new(),
        )
    }

    /// Table index
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sponsoring parent, if any
    pub fn parent(&self) -> Option<ModuleId> {
        self.parent
    }

    /// Descriptor this instance was built from
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Acquired clock handles, in descriptor order
    pub fn clocks(&self) -> &[ClockId] {
        &self.clocks
    }

    /// Clock handle at `index`, if the module has one there
    pub fn clock(&self, index: usize) -> Option<ClockId> {
        self.clocks.get(index).copied()
    }

    pub(crate) fn hooks(&self) -> &dyn ModuleHooks {
        self.descriptor.hook_set()
    }
}

// =============================================================================
// POWER STATE
// =============================================================================

/// Externally visible power phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPhase {
    /// Unpowered with no users
    Off,
    /// At least one user
    Active,
    /// No users, still powered, power-down scheduled
    IdlePending,
}

/// State guarded by the module's power lock
#[derive(Debug, Default)]
pub(crate) struct PowerState {
    pub(crate) refcount: usize,
    pub(crate) powered: bool,
}

impl PowerState {
    pub(crate) fn phase(&self) -> PowerPhase {
        match (self.refcount, self.powered) {
            (0, false) => PowerPhase::Off,
            (0, true) => PowerPhase::IdlePending,
            _ => PowerPhase::Active,
        }
    }
}

// =============================================================================
// MODULE INSTANCE
// =============================================================================

/// A live module: identity, power lock, idle signal and deferred work slot
pub struct ModuleInstance {
    info: ModuleInfo,
    state: Mutex<PowerState>,
    idle: Condvar,
    work: WorkId,
}

impl ModuleInstance {
    pub(crate) fn new(info: ModuleInfo, work: WorkId) -> Self {
        Self {
            info,
            state: Mutex::new(PowerState::default()),
            idle: Condvar::new(),
            work,
        }
    }

    /// Immutable module identity
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub(crate) fn work(&self) -> WorkId {
        self.work
    }

    /// Take the power lock. A poisoned lock only follows a fatal invariant
    /// violation, so the guard is recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current reference count
    pub fn refcount(&self) -> usize {
        self.lock().refcount
    }

    /// Is the module powered?
    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    /// Current phase
    pub fn phase(&self) -> PowerPhase {
        self.lock().phase()
    }

    /// Has the refcount reached zero?
    pub fn is_idle(&self) -> bool {
        self.lock().refcount == 0
    }

    /// Wake everyone blocked in [`wait_idle`](Self::wait_idle)
    pub(crate) fn signal_idle(&self) {
        self.idle.notify_all();
    }

    /// Block until the refcount reaches zero or `timeout` elapses.
    /// Returns whether the module was idle when the wait ended.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .idle
            .wait_timeout_while(guard, timeout, |state| state.refcount != 0)
            .unwrap_or_else(PoisonError::into_inner);
        guard.refcount == 0
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ModuleInstance")
            .field("name", &self.info.name)
            .field("refcount", &state.refcount)
            .field("powered", &state.powered)
            .field("work", &self.work)
            .finish()
    }
}
