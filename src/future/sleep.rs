use crate::context;
use crate::task::Coroutine;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Suspends the calling coroutine for at least `duration`.
///
/// The coroutine is resumed by a timer worker once the deadline passes; under
/// a loaded pool the actual delay can exceed the request by the pump's wake-up
/// granularity.
pub fn sleep_for(duration: Duration) -> Sleep {
    Sleep {
        ready_at: Instant::now() + duration,
        skip_if_past: false,
        registered: false,
    }
}

/// Suspends the calling coroutine until `ready_at`. Already-passed deadlines
/// complete without suspending.
pub fn sleep_until(ready_at: Instant) -> Sleep {
    Sleep {
        ready_at,
        skip_if_past: true,
        registered: false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    ready_at: Instant,
    skip_if_past: bool,
    registered: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.registered {
            // A timer worker resumed us; the deadline has passed.
            return Poll::Ready(());
        }

        if self.skip_if_past && Instant::now() > self.ready_at {
            return Poll::Ready(());
        }

        let coro = context::current_coroutine();
        let resume = Coroutine::resume_task(&coro);
        Coroutine::scheduler(&coro)
            .delayed
            .schedule(resume, self.ready_at);

        self.registered = true;
        Poll::Pending
    }
}
