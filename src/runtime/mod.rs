use crate::context;
use std::future::Future;

// Public API
pub mod builder;
pub use builder::{init, Builder};

pub mod pool;
pub use pool::Pool;

// Exports
pub(crate) mod scheduler;
pub(crate) use scheduler::Scheduler;

mod worker;
pub(crate) use worker::WorkerKind;

#[cfg(test)]
mod tests;

/// Used wherever we rely on SmallVec to store entries on the stack first,
/// sparing a heap allocation on the common path.
pub(crate) const SPILL_TO_HEAP_THRESHOLD: usize = 16;

/// Spawns a coroutine onto the pool that owns the current worker thread.
///
/// Only callable from inside a task or coroutine already running on a pool;
/// use [`Pool::spawn`] from other threads.
///
/// # Panics
///
/// Panics when called from a thread that is not a pool worker.
#[track_caller]
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    context::with_scheduler(|s| Scheduler::spawn(s, future));
}

/// Enqueues a plain callable onto the pool that owns the current worker
/// thread. Blocks while the main queue is full.
///
/// # Panics
///
/// Panics when called from a thread that is not a pool worker.
#[track_caller]
pub fn enqueue<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    context::with_scheduler(|s| s.submit(f));
}
