//! Real-time work queue backed by one scheduler thread.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use super::{WorkFn, WorkId, WorkQueue};

struct Item {
    work: WorkFn,
    deadline: Option<Instant>,
    running: bool,
    started: u64,
    finished: u64,
}

#[derive(Default)]
struct QueueState {
    items: BTreeMap<WorkId, Item>,
    next_id: u64,
    shutdown: bool,
}

impl QueueState {
    fn next_deadline(&self) -> Option<(Instant, WorkId)> {
        self.items
            .iter()
            .filter_map(|(id, item)| item.deadline.map(|d| (d, *id)))
            .min()
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when deadlines change or on shutdown
    wake: Condvar,
    /// Signalled after every completed run
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return;
            }

            let now = Instant::now();
            match state.next_deadline() {
                Some((deadline, id)) if deadline <= now => {
                    let work = match state.items.get_mut(&id) {
                        Some(item) => {
                            item.deadline = None;
                            item.running = true;
                            item.started += 1;
                            item.work.clone()
                        }
                        None => continue,
                    };
                    drop(state);

                    work();

                    state = self.lock();
                    if let Some(item) = state.items.get_mut(&id) {
                        item.running = false;
                        item.finished += 1;
                    }
                    self.done.notify_all();
                }
                Some((deadline, _)) => {
                    state = self
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Work queue with a dedicated scheduler thread
///
/// Callbacks run one at a time on the scheduler thread, never on the caller
/// of [`schedule`](WorkQueue::schedule). Dropping the queue stops the thread;
/// pending runs are discarded.
pub struct ThreadWorkQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl ThreadWorkQueue {
    /// Spawn the scheduler thread
    pub fn new() -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(String::from("acm-workqueue"))
                .spawn(move || shared.run())?
        };
        let worker_id = worker.thread().id();
        Ok(Self {
            shared,
            worker: Some(worker),
            worker_id,
        })
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl WorkQueue for ThreadWorkQueue {
    fn bind(&self, work: WorkFn) -> WorkId {
        let mut state = self.shared.lock();
        let id = WorkId(state.next_id);
        state.next_id += 1;
        state.items.insert(
            id,
            Item {
                work,
                deadline: None,
                running: false,
                started: 0,
                finished: 0,
            },
        );
        id
    }

    fn unbind(&self, id: WorkId) {
        self.shared.lock().items.remove(&id);
        self.shared.done.notify_all();
    }

    fn schedule(&self, id: WorkId, delay: Duration) {
        let mut state = self.shared.lock();
        if let Some(item) = state.items.get_mut(&id) {
            item.deadline = Some(Instant::now() + delay);
            self.shared.wake.notify_one();
        }
    }

    fn cancel(&self, id: WorkId) -> bool {
        let mut state = self.shared.lock();
        let cancelled = state
            .items
            .get_mut(&id)
            .and_then(|item| item.deadline.take())
            .is_some();
        if cancelled {
            // A flush may be waiting on the run that just went away
            self.shared.done.notify_all();
        }
        cancelled
    }

    fn flush(&self, id: WorkId) {
        // The scheduler thread cannot wait for itself
        if self.on_worker() {
            return;
        }

        let mut state = self.shared.lock();
        let target = match state.items.get_mut(&id) {
            Some(item) if item.deadline.is_some() => {
                item.deadline = Some(Instant::now());
                item.started + 1
            }
            Some(item) if item.running => item.started,
            _ => return,
        };
        self.shared.wake.notify_one();

        // Stop once the run completed, or once it was cancelled before the
        // worker picked it up
        while state.items.get(&id).is_some_and(|item| {
            item.finished < target && (item.deadline.is_some() || item.running)
        }) {
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_pending(&self, id: WorkId) -> bool {
        self.shared
            .lock()
            .items
            .get(&id)
            .is_some_and(|item| item.deadline.is_some())
    }
}

impl Drop for ThreadWorkQueue {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            // The last owner can be a callback running on the worker itself
            if !self.on_worker() {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for ThreadWorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadWorkQueue")
            .field("worker", &self.worker_id)
            .field("items", &self.shared.lock().items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn counting(queue: &ThreadWorkQueue) -> (Arc<AtomicUsize>, WorkId) {
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            queue.bind(Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        (hits, id)
    }

    fn wait_for(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_runs_on_worker_thread() {
        let queue = ThreadWorkQueue::new().unwrap();
        let caller = thread::current().id();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let id = {
            let seen = Arc::clone(&seen);
            queue.bind(Arc::new(move || {
                *seen.lock().unwrap() = Some(thread::current().id());
            }))
        };

        queue.schedule(id, Duration::from_millis(1));
        assert!(wait_for(Duration::from_secs(5), || seen.lock().unwrap().is_some()));
        assert_ne!(seen.lock().unwrap().unwrap(), caller);
    }

    #[test]
    fn test_cancel_before_deadline() {
        let queue = ThreadWorkQueue::new().unwrap();
        let (hits, id) = counting(&queue);

        queue.schedule(id, Duration::from_secs(30));
        assert!(queue.is_pending(id));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.is_pending(id));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_flush_expedites_pending_run() {
        let queue = ThreadWorkQueue::new().unwrap();
        let (hits, id) = counting(&queue);

        queue.schedule(id, Duration::from_secs(30));
        queue.flush(id);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!queue.is_pending(id));

        // Nothing pending: returns immediately
        queue.flush(id);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let queue = ThreadWorkQueue::new().unwrap();
        let (hits, id) = counting(&queue);

        queue.schedule(id, Duration::from_millis(5));
        queue.schedule(id, Duration::from_secs(30));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        queue.schedule(id, Duration::ZERO);
        assert!(wait_for(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_flush_waits_for_run_in_flight() {
        let queue = ThreadWorkQueue::new().unwrap();
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let id = {
            let (entered, finished) = (Arc::clone(&entered), Arc::clone(&finished));
            queue.bind(Arc::new(move || {
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                finished.fetch_add(1, Ordering::SeqCst);
            }))
        };

        queue.schedule(id, Duration::ZERO);
        assert!(wait_for(Duration::from_secs(5), || entered.load(Ordering::SeqCst) == 1));

        queue.flush(id);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_returns_when_run_is_cancelled() {
        let queue = Arc::new(ThreadWorkQueue::new().unwrap());
        let blocking = Arc::new(AtomicUsize::new(0));
        let blocker = {
            let blocking = Arc::clone(&blocking);
            queue.bind(Arc::new(move || {
                blocking.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
            }))
        };
        let (hits, target) = counting(&queue);

        // Keep the worker busy so the expedited run cannot start
        queue.schedule(blocker, Duration::ZERO);
        assert!(wait_for(Duration::from_secs(5), || blocking.load(Ordering::SeqCst) == 1));
        queue.schedule(target, Duration::from_secs(30));

        let (tx, rx) = std::sync::mpsc::channel();
        let flusher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.flush(target);
                let _ = tx.send(());
            })
        };

        thread::sleep(Duration::from_millis(50));
        queue.cancel(target);

        assert!(rx.recv_timeout(Duration::from_secs(3)).is_ok());
        flusher.join().unwrap();

        thread::sleep(Duration::from_millis(350));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!queue.is_pending(target));
    }
}
