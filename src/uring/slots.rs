//! Lock-free submission slot ring shared by producers and the pump.
//!
//! Producers claim a turn from `tail`, write their request into the slot at
//! `turn % S`, and publish it by storing `turn + 1` into the slot's counter.
//! The single pump consumes slots strictly in turn order, recycling each with
//! `turn + S`. A slot counter therefore only ever holds values congruent to
//! its index modulo `S`, advancing one lap at a time.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};

/// One pending read: everything the pump needs to build a kernel entry.
pub(crate) struct ReadRequest {
    pub(crate) fd: RawFd,
    pub(crate) buf: *mut u8,
    pub(crate) len: u32,
    pub(crate) user_data: u64,
}

struct SubmitSlot {
    turn: AtomicU32,
    request: UnsafeCell<MaybeUninit<ReadRequest>>,
}

// Safety: a slot's request cell is written by the unique holder of the current
// turn and read by the pump only after observing the turn published.
unsafe impl Send for SubmitSlot {}
unsafe impl Sync for SubmitSlot {}

pub(crate) struct SubmitRing {
    slots: Box<[SubmitSlot]>,

    /// Next unclaimed turn.
    tail: CachePadded<AtomicU32>,

    /// Turns consumed by the pump; producers gate on this for back-pressure.
    head: CachePadded<AtomicU32>,
}

impl SubmitRing {
    pub(crate) fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "submission ring size must be a power of two");

        let slots = (0..size as u32)
            .map(|i| SubmitSlot {
                turn: AtomicU32::new(i),
                request: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Box<[_]>>();

        SubmitRing {
            slots,
            tail: CachePadded::new(AtomicU32::new(0)),
            head: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the next turn. The claim is unconditional; callers must check
    /// [`is_full`](Self::is_full) and back off before filling.
    pub(crate) fn claim(&self) -> u32 {
        self.tail.fetch_add(1, Ordering::Acquire)
    }

    /// A turn may not be filled while the ring holds `S - 1` unconsumed
    /// entries ahead of it; the last slot is reserved for the pump's timeout.
    pub(crate) fn is_full(&self, turn: u32) -> bool {
        turn.wrapping_sub(self.head.load(Ordering::Acquire)) >= self.capacity() as u32 - 1
    }

    /// Fills the claimed slot and publishes it to the pump.
    pub(crate) fn publish(&self, turn: u32, request: ReadRequest) {
        let slot = &self.slots[turn as usize & (self.capacity() - 1)];
        debug_assert_eq!(slot.turn.load(Ordering::Relaxed), turn);

        unsafe { (*slot.request.get()).write(request) };
        slot.turn.store(turn.wrapping_add(1), Ordering::Release);
    }

    /// Number of turns claimed beyond `submitted`. Includes turns whose
    /// producers have not finished filling yet.
    pub(crate) fn filled(&self, submitted: u32) -> u32 {
        self.tail.load(Ordering::Acquire).wrapping_sub(submitted)
    }

    /// Takes the request at `turn`, spinning until its producer publishes.
    /// `keep_waiting` runs on every spin; returning `false` abandons the take.
    pub(crate) fn take(
        &self,
        turn: u32,
        mut keep_waiting: impl FnMut() -> bool,
    ) -> Option<ReadRequest> {
        let slot = &self.slots[turn as usize & (self.capacity() - 1)];

        while slot.turn.load(Ordering::Acquire) != turn.wrapping_add(1) {
            if !keep_waiting() {
                return None;
            }
            hint::spin_loop();
        }

        let request = unsafe { (*slot.request.get()).assume_init_read() };

        slot.turn
            .store(turn.wrapping_add(self.capacity() as u32), Ordering::Release);
        self.head.store(turn.wrapping_add(1), Ordering::Release);

        Some(request)
    }
}

impl fmt::Debug for SubmitRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitRing")
            .field("capacity", &self.capacity())
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("head", &self.head.load(Ordering::Relaxed))
            .finish()
    }
}
