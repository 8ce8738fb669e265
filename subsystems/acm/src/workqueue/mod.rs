//! # Deferred Work
//!
//! A work queue runs one-shot callbacks after a delay. The engine binds one
//! callback per module (its power-down handler) and arms it whenever the
//! module goes idle.
//!
//! ## Contract
//!
//! - [`schedule`](WorkQueue::schedule) arms the item to run no earlier than
//!   `delay` from now, replacing any pending deadline. An item is never queued
//!   twice.
//! - [`cancel`](WorkQueue::cancel) is idempotent and never waits: a pending
//!   run is dropped, a run that already started finishes.
//! - [`flush`](WorkQueue::flush) runs a pending item immediately and returns
//!   once that run, and any run already in flight, has completed. Re-arms made
//!   by the callback itself stay pending.
//!
//! Two implementations ship with the engine: [`ThreadWorkQueue`] for real
//! time and [`ManualWorkQueue`] for virtual time in tests.

use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;

mod manual;
mod thread;

pub use manual::ManualWorkQueue;
pub use thread::ThreadWorkQueue;

/// Handle to a bound work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work#{}", self.0)
    }
}

/// A deferred callback
pub type WorkFn = Arc<dyn Fn() + Send + Sync>;

/// Cancellable, re-armable one-shot timers
pub trait WorkQueue: Send + Sync {
    /// Register a callback; it stays idle until scheduled
    fn bind(&self, work: WorkFn) -> WorkId;

    /// Forget a callback. Pending runs are dropped.
    fn unbind(&self, id: WorkId);

    /// Arm (or re-arm) `id` to run after `delay`
    fn schedule(&self, id: WorkId, delay: Duration);

    /// Drop a pending run. Returns whether one was pending.
    fn cancel(&self, id: WorkId) -> bool;

    /// Run a pending item now and wait for it
    fn flush(&self, id: WorkId);

    /// Is a run pending?
    fn is_pending(&self, id: WorkId) -> bool;
}
