//! Worker thread loops.

use crate::context;
use crate::runtime::Scheduler;
use crate::task::Task;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerKind {
    /// Drains the main queue.
    General,

    /// Drains the timed queue fed by the delayed store.
    Timer,
}

/// The body of every worker thread: pop, run, drain the try-task slot,
/// repeat until `quit`.
///
/// A panic escaping a task trips the whole pool: the quit flag goes up, the
/// join loop stops pumping, and the other workers exit after their shutdown
/// sentinel. This worker exits immediately.
pub(crate) fn run(scheduler: Arc<Scheduler>, kind: WorkerKind) {
    context::init_worker(Arc::clone(&scheduler));

    while !scheduler.is_quitting() {
        let task = match kind {
            WorkerKind::General => scheduler.main_queue.pop(),
            WorkerKind::Timer => scheduler.timed_queue.pop(),
        };

        if !run_task(&scheduler, task) {
            return;
        }

        // The task may have parked a queue-mate via `try_yield`; it runs
        // before the next pop.
        while let Some(parked) = context::take_try_task() {
            if !run_task(&scheduler, parked) {
                return;
            }
        }
    }
}

fn run_task(scheduler: &Scheduler, task: Task) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(()) => true,
        Err(payload) => {
            scheduler.begin_shutdown();
            tracing::error!(
                panic = panic_message(&payload),
                "task panicked; shutting the pool down"
            );
            false
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
