//! Bounded MPMC queue over a fixed ring of slots.
//!
//! Producers and consumers claim monotonically increasing 32-bit turns from
//! `tail`/`head` and rendezvous on a per-slot `state` counter:
//!
//! - `state == turn`: slot is empty, waiting for the producer of `turn`
//! - `state == turn + 1`: slot is full, waiting for the consumer of `turn`
//! - consumer hands the slot to the next lap by storing `turn + N`
//!
//! Turns wrap via unsigned arithmetic; `N` must be a power of two so indices
//! stay continuous across the wrap and `% N` folds to a mask. Blocking uses
//! `futex(2)` on the slot's `state` word, skipped by wakers when no thread is
//! registered in the slot's waiter count.

use crate::utils::futex;
use crate::utils::sys::CACHE_LINE_SIZE;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

struct Slot<T> {
    state: AtomicU32,
    waiters: AtomicU32,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(state: u32) -> Self {
        Slot {
            state: AtomicU32::new(state),
            waiters: AtomicU32::new(0),
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Blocks until `state` moves away from `observed`.
    fn wait(&self, observed: u32) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        futex::wait(&self.state, observed);
        self.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    fn notify_all(&self) {
        // Skip the syscall on the common uncontended path.
        if self.waiters.load(Ordering::Relaxed) == 0 {
            return;
        }
        futex::wake_all(&self.state);
    }
}

pub(crate) struct RingQueue<T, const N: usize> {
    buffer: Box<[Slot<T>]>,
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
}

// Safety: payloads are handed between threads through the slot turn protocol;
// a slot's storage is only touched by the unique holder of its current turn.
unsafe impl<T: Send, const N: usize> Send for RingQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingQueue<T, N> {}

impl<T, const N: usize> RingQueue<T, N> {
    // Scatter consecutive turns across cache lines while keeping runs of
    // `REPEAT` turns inside one line for some true sharing. Falls back to the
    // identity mapping when the ring is too small for a full period.
    const PER_LINE: u32 = (CACHE_LINE_SIZE / std::mem::align_of::<Slot<T>>()) as u32;
    const REPEAT: u32 = if Self::PER_LINE < 8 { Self::PER_LINE } else { 8 };
    const PERIOD: u32 = Self::PER_LINE * Self::REPEAT;

    pub(crate) fn new() -> Self {
        const {
            assert!(N.is_power_of_two(), "ring capacity must be a power of two");
            assert!(N <= 1 << 31, "ring capacity must fit 32-bit turn arithmetic");
        }

        let mut buffer = (0..N).map(|_| Slot::new(0)).collect::<Box<[_]>>();
        for turn in 0..N as u32 {
            *buffer[Self::shuffle(turn) as usize].state.get_mut() = turn;
        }

        RingQueue {
            buffer,
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Maps a logical index in `[0, N)` to a physical slot. A bijection on
    /// `[0, N)`: within each period it walks lines round-robin, e.g. with 8
    /// slots per line the visit order is 0, 8, 16, .. 1, 9, 17, ..
    #[inline(always)]
    fn shuffle(idx: u32) -> u32 {
        if Self::PER_LINE < 2 || (N as u32) < Self::PERIOD {
            idx
        } else {
            (idx / Self::PERIOD * Self::PERIOD)
                + ((idx / Self::REPEAT) % Self::PER_LINE)
                + ((idx % Self::REPEAT) * Self::PER_LINE)
        }
    }

    #[inline(always)]
    fn slot(&self, turn: u32) -> &Slot<T> {
        &self.buffer[Self::shuffle(turn % N as u32) as usize]
    }

    /// Blocks while the queue is full.
    pub(crate) fn push(&self, value: T) {
        let turn = self.tail.fetch_add(1, Ordering::Acquire);
        self.write_slot(turn, value);
    }

    /// Returns the value back when the queue is observed full at the
    /// compare-exchange.
    pub(crate) fn try_push(&self, value: T) -> Result<(), T> {
        let mut turn = self.tail.load(Ordering::Acquire);
        loop {
            if turn.wrapping_sub(self.head.load(Ordering::Acquire)) >= N as u32 {
                return Err(value);
            }
            match self.tail.compare_exchange_weak(
                turn,
                turn.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.write_slot(turn, value);
                    return Ok(());
                }
                Err(actual) => turn = actual,
            }
        }
    }

    fn write_slot(&self, turn: u32, value: T) {
        let slot = self.slot(turn);

        // Only waits when the ring is full: the slot still belongs to the
        // consumer one lap behind us.
        let mut state = slot.state.load(Ordering::Acquire);
        while state != turn {
            slot.wait(state);
            state = slot.state.load(Ordering::Acquire);
        }

        unsafe { (*slot.storage.get()).write(value) };

        slot.state.store(turn.wrapping_add(1), Ordering::Release);
        slot.notify_all();
    }

    /// Blocks while the queue is empty.
    pub(crate) fn pop(&self) -> T {
        let turn = self.head.fetch_add(1, Ordering::Acquire);
        let slot = self.slot(turn);

        let mut state = slot.state.load(Ordering::Acquire);
        while state != turn.wrapping_add(1) {
            slot.wait(state);
            state = slot.state.load(Ordering::Acquire);
        }

        let value = unsafe { (*slot.storage.get()).assume_init_read() };

        slot.state.store(turn.wrapping_add(N as u32), Ordering::Release);
        slot.notify_all();

        value
    }

    /// Returns `None` when the queue is observed empty at the
    /// compare-exchange.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut turn = self.head.load(Ordering::Acquire);
        loop {
            let slot = self.slot(turn);
            if slot.state.load(Ordering::Acquire) != turn.wrapping_add(1) {
                return None;
            }
            match self.head.compare_exchange_weak(
                turn,
                turn.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let value = unsafe { (*slot.storage.get()).assume_init_read() };

                    slot.state.store(turn.wrapping_add(N as u32), Ordering::Release);
                    slot.notify_all();

                    return Some(value);
                }
                Err(actual) => turn = actual,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn physical_state(&self, idx: usize) -> u32 {
        self.buffer[idx].state.load(Ordering::Acquire)
    }
}

impl<T, const N: usize> Drop for RingQueue<T, N> {
    fn drop(&mut self) {
        // Any slot between head and tail still owns a payload.
        let tail = *self.tail.get_mut();
        let mut turn = *self.head.get_mut();
        while turn != tail {
            let idx = Self::shuffle(turn % N as u32) as usize;
            unsafe { (*self.buffer[idx].storage.get()).assume_init_drop() };
            turn = turn.wrapping_add(1);
        }
    }
}

impl<T, const N: usize> fmt::Debug for RingQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &N)
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish()
    }
}
