//! The unit of work handed between queues and workers.

use std::fmt;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ptr;
use std::time::Instant;

pub(crate) mod coro;
pub(crate) use coro::Coroutine;

/// Payloads at most this large (and at most 8-byte aligned) are stored inline
/// in the task itself; everything else spills to the heap.
pub(crate) const TASK_INLINE_SIZE: usize = 40;
const TASK_INLINE_ALIGN: usize = 8;

#[repr(align(8))]
struct Storage([MaybeUninit<u8>; TASK_INLINE_SIZE]);

/// A move-only, type-erased `FnOnce() + Send`.
///
/// Two function pointers erase the payload: `invoke` consumes it, `drop_fn`
/// (present when the payload needs dropping, or lives on the heap) releases it
/// if the task is destroyed without ever running. Running and dropping are
/// mutually exclusive; Rust's move semantics guarantee a task is consumed at
/// most once.
pub(crate) struct Task {
    invoke: unsafe fn(*mut u8),
    drop_fn: Option<unsafe fn(*mut u8)>,
    storage: Storage,
}

// Safety: construction requires `F: Send`, and the payload is owned uniquely.
unsafe impl Send for Task {}

impl Task {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut storage = Storage([MaybeUninit::uninit(); TASK_INLINE_SIZE]);

        if mem::size_of::<F>() <= TASK_INLINE_SIZE && mem::align_of::<F>() <= TASK_INLINE_ALIGN {
            unsafe { ptr::write(storage.0.as_mut_ptr().cast::<F>(), f) };
            Task {
                invoke: invoke_inline::<F>,
                drop_fn: mem::needs_drop::<F>().then_some(drop_inline::<F> as unsafe fn(*mut u8)),
                storage,
            }
        } else {
            let spilled = Box::into_raw(Box::new(f));
            unsafe { ptr::write(storage.0.as_mut_ptr().cast::<*mut F>(), spilled) };
            Task {
                invoke: invoke_spilled::<F>,
                drop_fn: Some(drop_spilled::<F>),
                storage,
            }
        }
    }

    /// Invokes the payload, consuming the task. Panics from the payload
    /// propagate; the payload itself is released either way.
    pub(crate) fn run(self) {
        // Ownership of the payload passes to the invoker, including on
        // unwind, so the task's own drop glue must not see it again.
        let mut this = ManuallyDrop::new(self);
        unsafe { (this.invoke)(this.storage.0.as_mut_ptr().cast()) }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            unsafe { drop_fn(self.storage.0.as_mut_ptr().cast()) }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

unsafe fn invoke_inline<F: FnOnce()>(storage: *mut u8) {
    let f = unsafe { ptr::read(storage.cast::<F>()) };
    f();
}

unsafe fn drop_inline<F>(storage: *mut u8) {
    unsafe { ptr::drop_in_place(storage.cast::<F>()) }
}

unsafe fn invoke_spilled<F: FnOnce()>(storage: *mut u8) {
    let f = unsafe { Box::from_raw(ptr::read(storage.cast::<*mut F>())) };
    f();
}

unsafe fn drop_spilled<F>(storage: *mut u8) {
    drop(unsafe { Box::from_raw(ptr::read(storage.cast::<*mut F>())) });
}

/// A task paired with the instant it becomes runnable. Ordered as a min-heap
/// entry on `ready_at`; ties resolve arbitrarily.
#[derive(Debug)]
pub(crate) struct TimedTask {
    pub(crate) ready_at: Instant,
    pub(crate) task: Task,
}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl Eq for TimedTask {}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedTask {
    // Reversed so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.ready_at.cmp(&self.ready_at)
    }
}
