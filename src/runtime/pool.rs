//! The scoped handle bounding a running pool.

use crate::runtime::builder::RuntimeConfig;
use crate::runtime::{worker, Scheduler, WorkerKind};
use anyhow::Result;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long one pump pass may wait when no nearer deadline exists.
const PUMP_WINDOW: Duration = Duration::from_millis(5);

/// A running worker pool.
///
/// Created by [`init`](crate::init) or [`Builder::try_build`]. Dropping the
/// pool first [`join`](Pool::join)s outstanding work, then stops and joins
/// every worker thread.
///
/// [`Builder::try_build`]: crate::Builder::try_build
pub struct Pool {
    scheduler: Arc<Scheduler>,
    cfg: RuntimeConfig,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl Pool {
    pub(crate) fn try_new(cfg: RuntimeConfig) -> Result<Pool> {
        let scheduler = Arc::new(Scheduler::try_new(cfg.sq_ring_size)?);

        let pool = Pool {
            scheduler,
            cfg,
            handles: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        };

        if let Err(e) = pool.start_workers() {
            // Tear down whatever part of the pool already started before
            // surfacing the failure.
            pool.cleanup();
            return Err(e);
        }

        Ok(pool)
    }

    fn start_workers(&self) -> Result<()> {
        let mut handles = self.handles.lock();

        for i in 0..self.cfg.worker_threads {
            let scheduler = Arc::clone(&self.scheduler);
            let handle = thread::Builder::new()
                .name(format!("taskring-worker-{i}"))
                .spawn(move || worker::run(scheduler, WorkerKind::General))?;
            handles.push(handle);
        }

        for i in 0..self.cfg.timer_threads {
            let scheduler = Arc::clone(&self.scheduler);
            let handle = thread::Builder::new()
                .name(format!("taskring-timer-{i}"))
                .spawn(move || worker::run(scheduler, WorkerKind::Timer))?;
            handles.push(handle);
        }

        Ok(())
    }

    /// Pushes a task onto the main queue. Blocks while the queue is full.
    pub fn enqueue<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.submit(f);
    }

    /// Runs `f` no earlier than `ready_at`, on a timer worker.
    pub fn enqueue_at<F>(&self, ready_at: Instant, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.submit_at(ready_at, f);
    }

    /// Runs `f` no earlier than `delay` from now, on a timer worker.
    pub fn enqueue_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.submit_at(Instant::now() + delay, f);
    }

    /// Spawns a coroutine onto the pool.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Scheduler::spawn(&self.scheduler, future);
    }

    /// Outstanding tasks plus outstanding read submissions.
    pub fn pending_tasks(&self) -> u32 {
        self.scheduler.pending()
    }

    /// Blocks until every pending task has completed (or a task panic tripped
    /// shutdown), driving the read pump and the delayed store from the
    /// calling thread.
    pub fn join(&self) {
        let mut window = PUMP_WINDOW;

        while self.scheduler.pending() > 0 && !self.scheduler.is_quitting() {
            if let Err(e) = self.scheduler.engine.pump(&self.scheduler, window) {
                tracing::error!(error = %e, "read pump failed");
                break;
            }

            window = match self.scheduler.drain_due() {
                Some(next) => next
                    .saturating_duration_since(Instant::now())
                    .min(PUMP_WINDOW),
                None => PUMP_WINDOW,
            };
        }
    }

    fn cleanup(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        self.scheduler.begin_shutdown();

        // The quit flag alone cannot unblock a worker parked inside a
        // blocking pop; one empty sentinel per worker gets each of them back
        // to the loop condition. A full queue means the workers are not
        // parked on it (with quit raised, each pops at most once more), so a
        // failed push can simply drop the sentinel.
        for _ in 0..self.cfg.worker_threads {
            let sentinel = self.scheduler.new_task(|| {});
            let _ = self.scheduler.main_queue.try_push(sentinel);
        }
        for _ in 0..self.cfg.timer_threads {
            let sentinel = self.scheduler.new_task(|| {});
            let _ = self.scheduler.timed_queue.try_push(sentinel);
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated by panic");
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.join();
        self.cleanup();
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.cfg.worker_threads)
            .field("timers", &self.cfg.timer_threads)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
impl Pool {
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}
