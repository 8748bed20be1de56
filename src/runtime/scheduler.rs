//! The shared state of one pool: both dispatch queues, the delayed store, the
//! read engine, and the two global flags that drive termination.

use crate::queue::RingQueue;
use crate::task::{Coroutine, Task};
use crate::timer::DelayedQueue;
use crate::uring::ReadEngine;
use crate::utils::ScopeGuard;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Capacity of the main dispatch queue.
pub(crate) const MAIN_QUEUE_SIZE: usize = 2048;

/// Capacity of the queue feeding timer workers.
pub(crate) const TIMED_QUEUE_SIZE: usize = 1024;

pub(crate) struct Scheduler {
    pub(crate) main_queue: RingQueue<Task, MAIN_QUEUE_SIZE>,
    pub(crate) timed_queue: RingQueue<Task, TIMED_QUEUE_SIZE>,
    pub(crate) delayed: DelayedQueue,
    pub(crate) engine: ReadEngine,

    /// Outstanding tasks plus outstanding read submissions. `Pool::join`
    /// drives the pump until this reaches zero.
    ///
    /// Shared behind its own `Arc` so each task can carry a decrement guard
    /// without referencing the whole scheduler.
    pending: Arc<AtomicU32>,

    /// Set once, never cleared. Workers and the join loop observe it and wind
    /// down.
    quit: AtomicBool,
}

impl Scheduler {
    pub(crate) fn try_new(sq_ring_size: usize) -> anyhow::Result<Self> {
        Ok(Scheduler {
            main_queue: RingQueue::new(),
            timed_queue: RingQueue::new(),
            delayed: DelayedQueue::new(),
            engine: ReadEngine::try_new(sq_ring_size)?,
            pending: Arc::new(AtomicU32::new(0)),
            quit: AtomicBool::new(false),
        })
    }

    /// Wraps a callable into a [`Task`] counted by `pending`.
    ///
    /// The count rises here and falls exactly once when the task runs to
    /// completion, including on unwind via the guard. A task dropped without
    /// running keeps its count, which only happens on the shutdown path where
    /// the count no longer gates anything.
    pub(crate) fn new_task<F>(&self, f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = Arc::clone(&self.pending);
        Task::new(move || {
            let _done = ScopeGuard::new(|| {
                pending.fetch_sub(1, Ordering::AcqRel);
            });
            f();
        })
    }

    pub(crate) fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.new_task(f);
        self.main_queue.push(task);
    }

    pub(crate) fn submit_at<F>(&self, ready_at: Instant, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.new_task(f);
        self.delayed.schedule(task, ready_at);
    }

    pub(crate) fn spawn<F>(this: &Arc<Self>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let coro = Coroutine::new(this, future);
        this.main_queue.push(Coroutine::resume_task(&coro));
    }

    /// Moves every due delayed task into the timed queue; returns the next
    /// deadline, if any.
    pub(crate) fn drain_due(&self) -> Option<Instant> {
        let (due, next) = self.delayed.drain_due(Instant::now());
        for task in due {
            self.timed_queue.push(task);
        }
        next
    }

    /// Accounts for one read submission; paired with [`finish_io`] when its
    /// completion is reaped.
    ///
    /// [`finish_io`]: Scheduler::finish_io
    pub(crate) fn begin_io(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn finish_io(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("quit", &self.is_quitting())
            .finish_non_exhaustive()
    }
}
