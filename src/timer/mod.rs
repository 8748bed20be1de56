//! Mutex-guarded min-heap of tasks keyed by the instant they become runnable.

use crate::runtime::SPILL_TO_HEAP_THRESHOLD;
use crate::task::{Task, TimedTask};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct DelayedQueue {
    heap: Mutex<BinaryHeap<TimedTask>>,
}

impl DelayedQueue {
    pub(crate) fn new() -> Self {
        DelayedQueue {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub(crate) fn schedule(&self, task: Task, ready_at: Instant) {
        self.heap.lock().push(TimedTask { ready_at, task });
    }

    /// Removes every entry due before `now` and returns it, together with the
    /// deadline of the next remaining entry.
    ///
    /// Publishing the due tasks is left to the caller so nothing is pushed
    /// into a possibly-full queue while the heap lock is held.
    pub(crate) fn drain_due(
        &self,
        now: Instant,
    ) -> (SmallVec<[Task; SPILL_TO_HEAP_THRESHOLD]>, Option<Instant>) {
        let mut heap = self.heap.lock();

        let mut due = SmallVec::new();
        while heap.peek().is_some_and(|entry| entry.ready_at < now) {
            due.push(heap.pop().expect("peeked entry vanished").task);
        }

        let next = heap.peek().map(|entry| entry.ready_at);
        (due, next)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_drain_due_publishes_in_deadline_order() {
        let delayed = DelayedQueue::new();
        let order = Arc::new(AtomicU32::new(0));
        let base = Instant::now();

        for (offset, expected_rank) in [(30u64, 2u32), (10, 0), (20, 1)] {
            let order = Arc::clone(&order);
            delayed.schedule(
                Task::new(move || {
                    assert_eq!(order.fetch_add(1, Ordering::SeqCst), expected_rank);
                }),
                base + Duration::from_millis(offset),
            );
        }

        let (due, next) = delayed.drain_due(base + Duration::from_millis(25));
        assert_eq!(due.len(), 2);
        assert_eq!(next, Some(base + Duration::from_millis(30)));
        for task in due {
            task.run();
        }

        let (due, next) = delayed.drain_due(base + Duration::from_millis(100));
        assert_eq!(due.len(), 1);
        assert_eq!(next, None);
        for task in due {
            task.run();
        }

        assert_eq!(order.load(Ordering::SeqCst), 3);
        assert_eq!(delayed.len(), 0);
    }

    #[test]
    fn test_nothing_due_reports_next_deadline() {
        let delayed = DelayedQueue::new();
        let base = Instant::now();
        delayed.schedule(Task::new(|| {}), base + Duration::from_secs(60));

        let (due, next) = delayed.drain_due(base);
        assert!(due.is_empty());
        assert_eq!(next, Some(base + Duration::from_secs(60)));
        assert_eq!(delayed.len(), 1);
    }
}
