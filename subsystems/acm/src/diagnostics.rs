//! # Idle Diagnostics
//!
//! When suspend cannot get a module idle in time, the host snapshots every
//! module's refcount and every held hardware lock and hands the snapshot to
//! a [`DiagnosticsSink`]. Rendering is the sink's business; the default sink
//! writes it to the log.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};

use crate::error::{AcmError, AcmResult};

// =============================================================================
// REPORT
// =============================================================================

/// One module's line in an [`IdleReport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    /// Module name
    pub name: String,
    /// Users at snapshot time
    pub refcount: usize,
    /// Powered at snapshot time
    pub powered: bool,
}

/// Snapshot of everything keeping the host awake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdleReport {
    /// Every live module, in table order
    pub modules: Vec<ModuleReport>,
    /// Held hardware locks as `(lock id, count)`
    pub locks: Vec<(usize, u32)>,
}

impl IdleReport {
    /// Modules that still have users
    pub fn busy_modules(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|m| m.refcount != 0)
    }

    /// No hardware lock is held
    pub fn locks_released(&self) -> bool {
        self.locks.is_empty()
    }

    /// Write the report to the log
    pub fn log(&self) {
        for module in &self.modules {
            warn!("acm: {}: refcnt {}", module.name, module.refcount);
        }
        for (id, count) in &self.locks {
            warn!("acm: lock id {}: refcnt {}", id, count);
        }
        if self.locks_released() {
            debug!("acm: all locks released");
        }
    }
}

// =============================================================================
// SINK
// =============================================================================

/// Receiver for suspend-timeout reports
pub trait DiagnosticsSink: Send + Sync {
    /// Called when a suspend wait for idle timed out
    fn not_idle(&self, report: &IdleReport);
}

/// Sink that logs the report
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn not_idle(&self, report: &IdleReport) {
        warn!("acm: suspend timed out waiting for idle");
        report.log();
    }
}

// =============================================================================
// RESOURCE LOCKS
// =============================================================================

/// Counted hardware locks shared by the host's modules
///
/// Only the counts matter here; the engine reports them, it never blocks on
/// them.
#[derive(Debug)]
pub struct ResourceLocks {
    counts: Box<[AtomicU32]>,
}

impl ResourceLocks {
    /// `n` locks, all released
    pub fn new(n: usize) -> Self {
        Self {
            counts: (0..n).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of locks
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// No locks configured
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Take lock `id`; returns the new count
    pub fn acquire(&self, id: usize) -> AcmResult<u32> {
        let slot = self.counts.get(id).ok_or(AcmError::InvalidArgument)?;
        Ok(slot.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Drop lock `id`; returns the new count. Releasing a free lock is an
    /// argument error.
    pub fn release(&self, id: usize) -> AcmResult<u32> {
        let slot = self.counts.get(id).ok_or(AcmError::InvalidArgument)?;
        slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map(|prev| prev - 1)
            .map_err(|_| AcmError::InvalidArgument)
    }

    /// Current count of lock `id`
    pub fn count(&self, id: usize) -> u32 {
        self.counts
            .get(id)
            .map_or(0, |slot| slot.load(Ordering::Acquire))
    }

    /// Every lock with a nonzero count
    pub fn held(&self) -> Vec<(usize, u32)> {
        self.counts
            .iter()
            .enumerate()
            .map(|(id, slot)| (id, slot.load(Ordering::Acquire)))
            .filter(|(_, count)| *count != 0)
            .collect()
    }
}
