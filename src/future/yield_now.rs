use crate::context;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Re-enqueues the calling coroutine at the tail of the main queue, letting
/// every task already queued run first.
///
/// # Examples
///
/// ```no_run
/// # async fn doc() {
/// for i in 0..1_000_000 {
///     // Heavy computation...
///
///     if i % 100 == 0 {
///         // Let other tasks run every 100 iterations.
///         taskring::yield_now().await;
///     }
/// }
/// # }
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow {
        awaiting_first_poll: true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct YieldNow {
    awaiting_first_poll: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Only yield on first poll. Next time the task is scheduled we return.
        if self.awaiting_first_poll {
            self.awaiting_first_poll = false;
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Yields only if another task is already waiting in the main queue.
///
/// If one is, it is popped into the worker's local slot, the calling
/// coroutine re-enqueues itself, and the popped task runs as soon as the
/// current poll returns; the await then resolves to `true`. With an empty
/// queue the future is immediately ready with `false` and nothing suspends.
pub fn try_yield() -> TryYield {
    TryYield { resumed: None }
}

#[derive(Debug, Clone, Copy)]
pub struct TryYield {
    resumed: Option<bool>,
}

impl Future for TryYield {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.resumed {
            Some(yielded) => Poll::Ready(yielded),
            None => match context::with_scheduler(|s| s.main_queue.try_pop()) {
                Some(task) => {
                    context::stash_try_task(task);
                    self.resumed = Some(true);
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                None => {
                    self.resumed = Some(false);
                    Poll::Ready(false)
                }
            },
        }
    }
}
