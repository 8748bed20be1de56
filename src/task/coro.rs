//! Suspended user futures and the glue that turns "resume" into a [`Task`].
//!
//! A spawned future is boxed once and owned by an `Arc<Coroutine>`. Resuming
//! means polling that future on whichever worker popped the resume task; the
//! mutex guarantees a coroutine is never polled on two threads at once, while
//! consecutive resumptions may land on different threads.

use crate::context;
use crate::runtime::Scheduler;
use crate::task::Task;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) struct Coroutine {
    scheduler: Arc<Scheduler>,
    // `None` once the future has completed.
    future: Mutex<Option<BoxFuture>>,
}

impl Coroutine {
    pub(crate) fn new(
        scheduler: &Arc<Scheduler>,
        future: impl Future<Output = ()> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Coroutine {
            scheduler: Arc::clone(scheduler),
            future: Mutex::new(Some(Box::pin(future))),
        })
    }

    pub(crate) fn scheduler(this: &Arc<Self>) -> &Arc<Scheduler> {
        &this.scheduler
    }

    /// Polls the future once. Every suspension point re-registers the
    /// coroutine somewhere (main queue, delayed queue, or a submission slot),
    /// so a single poll per resume task is exactly right.
    pub(crate) fn resume(this: &Arc<Self>) {
        let waker = waker_ref(this);
        let mut cx = Context::from_waker(&waker);

        let mut slot = this.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };

        let _enter = context::enter_coroutine(this);
        if future.as_mut().poll(&mut cx).is_ready() {
            *slot = None;
        }
    }

    /// A pending-counted task that resumes this coroutine when run.
    pub(crate) fn resume_task(this: &Arc<Self>) -> Task {
        let coro = Arc::clone(this);
        this.scheduler.new_task(move || Coroutine::resume(&coro))
    }

    /// Round-trips the coroutine through a raw pointer, used to stash the
    /// continuation in a submission entry's user data.
    pub(crate) fn into_user_data(this: Arc<Self>) -> u64 {
        Arc::into_raw(this) as u64
    }

    /// # Safety
    ///
    /// `user_data` must come from [`Coroutine::into_user_data`] and must be
    /// redeemed exactly once.
    pub(crate) unsafe fn from_user_data(user_data: u64) -> Arc<Self> {
        unsafe { Arc::from_raw(user_data as *const Coroutine) }
    }
}

impl ArcWake for Coroutine {
    // The default resumption path: wake re-enqueues the coroutine at the tail
    // of the main queue. Timed and I/O resumptions bypass the waker and build
    // their resume tasks directly.
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let task = Coroutine::resume_task(arc_self);
        arc_self.scheduler.main_queue.push(task);
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine").finish_non_exhaustive()
    }
}
