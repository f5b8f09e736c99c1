//! Deferred re-submission of parked operations.
//!
//! When the service asks for backpressure (`Busy` with a delay), the
//! affected operation is parked here instead of failing. A single timer
//! thread owns a deadline-ordered heap and hands each job back to the
//! operation queue when its deadline passes. Each parked job runs exactly
//! once; if it fails again, it classifies its own fresh error.

use crate::queue::OperationQueue;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    tick: Condvar,
}

/// Timer that re-submits parked jobs to the operation queue after a
/// service-specified delay.
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
    timer: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    /// Creates a scheduler feeding the given queue.
    pub fn new(queue: Arc<OperationQueue>) -> Self {
        let inner = Arc::new(SchedulerInner {
            state: Mutex::new(SchedulerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            tick: Condvar::new(),
        });

        let timer_inner = Arc::clone(&inner);
        let timer = thread::spawn(move || Self::timer_loop(&timer_inner, &queue));

        Self {
            inner,
            timer: Some(timer),
        }
    }

    fn timer_loop(inner: &SchedulerInner, queue: &Arc<OperationQueue>) {
        let mut state = inner.state.lock();
        loop {
            if state.shutdown {
                return;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while state.heap.peek().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = state.heap.pop() {
                    due.push(entry);
                }
            }

            if !due.is_empty() {
                for entry in due {
                    queue.submit(entry.job);
                }
                continue;
            }

            match state.heap.peek().map(|e| e.deadline) {
                Some(deadline) => {
                    inner.tick.wait_until(&mut state, deadline);
                }
                None => inner.tick.wait(&mut state),
            }
        }
    }

    /// Parks a job to run after `delay`.
    ///
    /// Jobs scheduled after shutdown are dropped.
    pub fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            job: Box::new(job),
        });
        self.inner.tick.notify_one();
    }

    /// Returns the number of parked jobs.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().heap.len()
    }

    /// Drops every parked job without running it.
    ///
    /// Parked jobs own whatever they captured; cancelling releases it on
    /// the calling thread.
    pub fn cancel_all(&self) {
        self.inner.state.lock().heap.clear();
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.heap.clear();
        }
        self.inner.tick.notify_all();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let queue = Arc::new(OperationQueue::new(1));
        let scheduler = RetryScheduler::new(Arc::clone(&queue));
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(50), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending(), 1);

        // Not yet due.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(150));
        queue.drain();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn fires_in_deadline_order() {
        let queue = Arc::new(OperationQueue::new(1));
        let scheduler = RetryScheduler::new(Arc::clone(&queue));
        let (tx, rx) = mpsc::channel();

        let tx_late = tx.clone();
        scheduler.schedule(Duration::from_millis(40), move || {
            let _ = tx_late.send("late");
        });
        scheduler.schedule(Duration::from_millis(10), move || {
            let _ = tx.send("early");
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "late");
    }

    #[test]
    fn drop_discards_parked_jobs() {
        let queue = Arc::new(OperationQueue::new(1));
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let scheduler = RetryScheduler::new(Arc::clone(&queue));
            let f = Arc::clone(&fired);
            scheduler.schedule(Duration::from_secs(30), move || {
                f.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.drain();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_all_releases_what_jobs_captured() {
        let queue = Arc::new(OperationQueue::new(1));
        let scheduler = RetryScheduler::new(Arc::clone(&queue));
        let payload = Arc::new(());

        let held = Arc::clone(&payload);
        scheduler.schedule(Duration::from_secs(30), move || {
            let _ = &held;
        });
        assert_eq!(Arc::strong_count(&payload), 2);

        scheduler.cancel_all();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
