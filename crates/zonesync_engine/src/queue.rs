//! Bounded operation queue.
//!
//! Remote operations run on a fixed pool of worker threads. The pool bounds
//! how many operations are in flight at once, and `drain` blocks until the
//! queue is quiescent, which is what drain-before-notify hangs off.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    in_flight: usize,
    shutdown: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    work_available: Condvar,
    all_done: Condvar,
}

/// A fixed pool of worker threads executing submitted jobs in order of
/// submission.
///
/// Jobs submitted after shutdown are dropped. Completion continuations run
/// on whichever worker executed the job; the queue makes no ordering
/// promise between jobs running on different workers.
pub struct OperationQueue {
    inner: Arc<QueueInner>,
    workers: Vec<JoinHandle<()>>,
}

impl OperationQueue {
    /// Creates a queue with `max_workers` worker threads.
    pub fn new(max_workers: usize) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                in_flight: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            all_done: Condvar::new(),
        });

        let workers = (0..max_workers.max(1))
            .map(|_| {
                let inner = Arc::clone(&inner);
                thread::spawn(move || Self::worker_loop(&inner))
            })
            .collect();

        Self { inner, workers }
    }

    fn worker_loop(inner: &QueueInner) {
        loop {
            let job = {
                let mut state = inner.state.lock();
                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        state.in_flight += 1;
                        break Some(job);
                    }
                    if state.shutdown {
                        break None;
                    }
                    inner.work_available.wait(&mut state);
                }
            };

            let Some(job) = job else { break };
            job();

            let mut state = inner.state.lock();
            state.in_flight -= 1;
            if state.in_flight == 0 && state.jobs.is_empty() {
                inner.all_done.notify_all();
            }
        }
    }

    /// Submits a job. Dropped silently if the queue is shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return;
        }
        state.jobs.push_back(Box::new(job));
        self.inner.work_available.notify_one();
    }

    /// Blocks until no job is queued or running.
    ///
    /// Jobs submitted while draining extend the wait.
    pub fn drain(&self) {
        let mut state = self.inner.state.lock();
        while !(state.jobs.is_empty() && state.in_flight == 0) {
            self.inner.all_done.wait(&mut state);
        }
    }

    /// Returns the number of jobs waiting to start.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// Returns true when no job is queued or running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.jobs.is_empty() && state.in_flight == 0
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.jobs.clear();
        }
        self.inner.work_available.notify_all();
        self.inner.all_done.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn executes_submitted_jobs() {
        let queue = OperationQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            queue.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(queue.is_idle());
    }

    #[test]
    fn concurrency_is_bounded_by_worker_count() {
        let queue = OperationQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        queue.drain();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn drain_on_idle_queue_returns_immediately() {
        let queue = OperationQueue::new(1);
        queue.drain();
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn jobs_after_drop_are_not_executed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = OperationQueue::new(1);
        drop(queue);

        // A fresh queue still works; the dropped one is gone.
        let queue = OperationQueue::new(1);
        let c = Arc::clone(&counter);
        queue.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_waits_for_running_job() {
        let queue = OperationQueue::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        let d = Arc::clone(&done);
        queue.submit(move || {
            thread::sleep(Duration::from_millis(30));
            d.store(1, Ordering::SeqCst);
        });

        queue.drain();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
