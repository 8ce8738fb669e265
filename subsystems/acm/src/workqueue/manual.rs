//! Virtual-time work queue.
//!
//! Nothing runs on its own: callbacks fire inside [`ManualWorkQueue::advance`]
//! or [`WorkQueue::flush`], on the calling thread, in deadline order.

use alloc::collections::BTreeMap;
use core::fmt;
use core::time::Duration;

use spin::Mutex;

use super::{WorkFn, WorkId, WorkQueue};

struct ManualItem {
    work: WorkFn,
    deadline: Option<Duration>,
    arms: u64,
    runs: u64,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    items: BTreeMap<WorkId, ManualItem>,
}

impl ManualState {
    /// Earliest pending item due at or before `limit`
    fn next_due(&self, limit: Duration) -> Option<(Duration, WorkId)> {
        self.items
            .iter()
            .filter_map(|(id, item)| item.deadline.map(|d| (d, *id)))
            .filter(|(deadline, _)| *deadline <= limit)
            .min()
    }

    /// Disarm `id` and hand back its callback
    fn take(&mut self, id: WorkId) -> Option<WorkFn> {
        let item = self.items.get_mut(&id)?;
        item.deadline = None;
        item.runs += 1;
        Some(item.work.clone())
    }
}

/// Work queue driven by an explicit virtual clock
#[derive(Default)]
pub struct ManualWorkQueue {
    state: Mutex<ManualState>,
}

impl ManualWorkQueue {
    /// Empty queue at virtual time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Move the clock forward by `by`, running everything that falls due on
    /// the way. Items armed by a callback run too if they fall inside the
    /// window.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let work = {
                let mut state = self.state.lock();
                match state.next_due(target) {
                    Some((deadline, id)) => {
                        state.now = state.now.max(deadline);
                        state.take(id)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match work {
                Some(work) => work(),
                None => break,
            }
        }
    }

    /// Run everything already due without moving the clock
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    /// Deadline of `id` relative to now, if pending
    pub fn remaining(&self, id: WorkId) -> Option<Duration> {
        let state = self.state.lock();
        let deadline = state.items.get(&id)?.deadline?;
        Some(deadline.saturating_sub(state.now))
    }

    /// Times `id` has been armed
    pub fn arms(&self, id: WorkId) -> u64 {
        self.state.lock().items.get(&id).map_or(0, |item| item.arms)
    }

    /// Times `id` has run
    pub fn runs(&self, id: WorkId) -> u64 {
        self.state.lock().items.get(&id).map_or(0, |item| item.runs)
    }
}

impl WorkQueue for ManualWorkQueue {
    fn bind(&self, work: WorkFn) -> WorkId {
        let mut state = self.state.lock();
        let id = WorkId(state.next_id);
        state.next_id += 1;
        state.items.insert(
            id,
            ManualItem {
                work,
                deadline: None,
                arms: 0,
                runs: 0,
            },
        );
        id
    }

    fn unbind(&self, id: WorkId) {
        self.state.lock().items.remove(&id);
    }

    fn schedule(&self, id: WorkId, delay: Duration) {
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        if let Some(item) = state.items.get_mut(&id) {
            item.deadline = Some(deadline);
            item.arms += 1;
        }
    }

    fn cancel(&self, id: WorkId) -> bool {
        let mut state = self.state.lock();
        state
            .items
            .get_mut(&id)
            .and_then(|item| item.deadline.take())
            .is_some()
    }

    fn flush(&self, id: WorkId) {
        let work = {
            let mut state = self.state.lock();
            match state.items.get(&id) {
                Some(item) if item.deadline.is_some() => state.take(id),
                _ => None,
            }
        };
        if let Some(work) = work {
            work();
        }
    }

    fn is_pending(&self, id: WorkId) -> bool {
        self.state
            .lock()
            .items
            .get(&id)
            .is_some_and(|item| item.deadline.is_some())
    }
}

impl fmt::Debug for ManualWorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualWorkQueue")
            .field("now", &state.now)
            .field("items", &state.items.len())
            .finish()
    }
}
