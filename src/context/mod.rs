//! Thread-local state for worker threads.
//!
//! Each worker thread is bound to its scheduler once at startup. While a
//! coroutine is being polled, it is also exposed here so that awaitables can
//! reach both the coroutine handle and the scheduler without threading them
//! through every call.

use crate::runtime::Scheduler;
use crate::task::{Coroutine, Task};
use std::cell::{OnceCell, RefCell};
use std::sync::Arc;

thread_local! {
    static SCHEDULER: OnceCell<Arc<Scheduler>> = const { OnceCell::new() };
    static CURRENT_CORO: RefCell<Option<Arc<Coroutine>>> = const { RefCell::new(None) };
    static TRY_SLOT: RefCell<Option<Task>> = const { RefCell::new(None) };
}

pub(crate) fn init_worker(scheduler: Arc<Scheduler>) {
    SCHEDULER.with(|cell| {
        if cell.set(scheduler).is_err() {
            panic!("worker context initialized twice on the same thread");
        }
    });
}

#[track_caller]
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&Arc<Scheduler>) -> R,
{
    SCHEDULER.with(|cell| {
        let scheduler = cell
            .get()
            .expect("not running on a taskring worker thread");
        f(scheduler)
    })
}

/// Marks `coro` as the coroutine being polled on this thread; the previous
/// value is restored when the returned guard drops.
pub(crate) fn enter_coroutine(coro: &Arc<Coroutine>) -> EnterGuard {
    let prev = CURRENT_CORO.with(|cell| cell.borrow_mut().replace(Arc::clone(coro)));
    EnterGuard { prev }
}

pub(crate) struct EnterGuard {
    prev: Option<Arc<Coroutine>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_CORO.with(|cell| *cell.borrow_mut() = self.prev.take());
    }
}

#[track_caller]
pub(crate) fn current_coroutine() -> Arc<Coroutine> {
    CURRENT_CORO.with(|cell| {
        cell.borrow()
            .clone()
            .expect("awaitable polled outside a pool coroutine")
    })
}

/// Parks a task popped by `try_yield` until the worker loop gets back control.
pub(crate) fn stash_try_task(task: Task) {
    TRY_SLOT.with(|slot| {
        let prev = slot.borrow_mut().replace(task);
        debug_assert!(prev.is_none(), "try-task slot already occupied");
    });
}

pub(crate) fn take_try_task() -> Option<Task> {
    TRY_SLOT.with(|slot| slot.borrow_mut().take())
}
