//! Asynchronous file-read engine.
//!
//! Worker threads fill lock-free submission slots ([`slots::SubmitRing`]).
//! A single pump, run from the join loop, drains filled slots into the
//! kernel submission queue, bounds every wait with a timeout entry, and turns
//! completions back into queued resume tasks.

use crate::runtime::{Scheduler, SPILL_TO_HEAP_THRESHOLD};
use crate::task::Coroutine;
use io_uring::types::Timespec;
use io_uring::{opcode, squeue, types, IoUring};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) mod slots;
pub(crate) use slots::ReadRequest;
use slots::SubmitRing;

/// Marks the pump's own timeout entry; never a valid continuation pointer.
const TIMEOUT_USER_DATA: u64 = 0;

#[derive(thiserror::Error, Debug)]
pub(crate) enum EngineError {
    #[error("FATAL: kernel submission queue rejected an entry")]
    SqPush,

    #[error("io_uring submit failed: {0}")]
    Submit(#[source] io::Error),
}

pub(crate) struct ReadEngine {
    pub(crate) slots: SubmitRing,
    pump: Mutex<Pump>,
}

struct Pump {
    ring: IoUring,

    /// Backing store for the timeout entry's timespec; the submission entry
    /// holds a raw pointer to it, so it lives here rather than on the stack.
    timeout_ts: Timespec,

    /// Next turn to hand to the kernel. Trails `slots` tail; the gap is what
    /// each pass submits.
    submitted: u32,

    /// Entries pushed into the kernel SQ whose completions have not been
    /// reaped. Counted at push, not at submit: an entry stranded in the SQ by
    /// a transient submit failure still holds the loop open until a later
    /// pass flushes it and its completion arrives.
    pending_io: usize,
}

impl ReadEngine {
    pub(crate) fn try_new(sq_ring_size: usize) -> anyhow::Result<Self> {
        let ring = IoUring::builder().build(sq_ring_size as u32)?;

        if !ring.params().is_feature_nodrop() {
            eprintln!(
                "Warning: IORING_FEAT_NODROP is not enabled for this kernel. The kernel will silently drop completions if the CQ ring is full."
            );
        }

        Ok(ReadEngine {
            slots: SubmitRing::new(sq_ring_size),
            pump: Mutex::new(Pump {
                ring,
                timeout_ts: Timespec::new(),
                submitted: 0,
                pending_io: 0,
            }),
        })
    }

    /// Submits filled slots and reaps completions until the pump's own
    /// timeout entry fires (or `deadline` passes, or `quit` is observed).
    ///
    /// Exactly one thread drives this: the caller of `Pool::join`. Producers
    /// never touch the kernel queues, the pump never claims slot turns.
    pub(crate) fn pump(
        &self,
        scheduler: &Arc<Scheduler>,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let mut pump = self.pump.lock();
        let deadline = Instant::now() + timeout;

        let mut to_submit = self.slots.filled(pump.submitted);
        while to_submit > 0 || pump.pending_io > 0 {
            // One kernel slot is reserved for the timeout entry. A transient
            // EBUSY can leave entries from the previous pass in the SQ, so the
            // batch is also capped by the space actually free.
            let free = {
                let sq = pump.ring.submission();
                sq.capacity().saturating_sub(sq.len())
            };
            let batch = (to_submit as usize)
                .min(self.slots.capacity() - 1)
                .min(free.saturating_sub(1));

            let mut entries: SmallVec<[squeue::Entry; SPILL_TO_HEAP_THRESHOLD]> =
                SmallVec::with_capacity(batch + 1);

            for i in 0..batch {
                let turn = pump.submitted.wrapping_add(i as u32);

                // A producer that claimed this turn may have been preempted
                // between claiming and filling; drive the timed store while
                // waiting it out.
                let req = match self.slots.take(turn, || {
                    scheduler.drain_due();
                    !scheduler.is_quitting()
                }) {
                    Some(req) => req,
                    None => return Ok(()),
                };

                entries.push(
                    opcode::Read::new(types::Fd(req.fd), req.buf, req.len)
                        .offset(0)
                        .build()
                        .user_data(req.user_data),
                );
            }
            pump.submitted = pump.submitted.wrapping_add(batch as u32);

            // Completes after one other completion or after the remaining
            // window, whichever comes first, so the wait below is bounded.
            pump.timeout_ts = Timespec::from(deadline.saturating_duration_since(Instant::now()));
            entries.push(
                opcode::Timeout::new(&pump.timeout_ts)
                    .count(1)
                    .build()
                    .user_data(TIMEOUT_USER_DATA),
            );

            {
                let mut sq = pump.ring.submission();
                for entry in entries.iter() {
                    // Safety: buffers and timespec outlive the submission; the
                    // continuation keeps the coroutine (and its buffer) alive
                    // until the completion is reaped.
                    if unsafe { sq.push(entry) }.is_err() {
                        scheduler.begin_shutdown();
                        return Err(EngineError::SqPush);
                    }
                }
                sq.sync();
            }
            // Everything pushed is owed a completion, whether or not the
            // submit below goes through on this pass.
            pump.pending_io += entries.len();

            loop {
                match pump.ring.submitter().submit_and_wait(1) {
                    Ok(_) => break,
                    Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                    Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                        // Transient: the CQ needs reaping before the kernel
                        // accepts more entries. Unsubmitted entries stay in
                        // the SQ, and stay counted in `pending_io`, so a
                        // later pass re-enters submit_and_wait to flush them.
                        break;
                    }
                    Err(e) => {
                        scheduler.begin_shutdown();
                        return Err(EngineError::Submit(e));
                    }
                }
            }

            let mut reaped = 0usize;
            let mut timed_out = false;
            for cqe in pump.ring.completion() {
                reaped += 1;

                if cqe.user_data() == TIMEOUT_USER_DATA {
                    if cqe.result() == -libc::ETIME {
                        timed_out = true;
                    }
                    continue;
                }

                if cqe.result() < 0 {
                    tracing::debug!(res = cqe.result(), "read completion reported an error");
                }

                // Safety: user data was produced by `into_user_data` at
                // submission and is redeemed exactly once here.
                let coro = unsafe { Coroutine::from_user_data(cqe.user_data()) };
                scheduler.main_queue.push(Coroutine::resume_task(&coro));
                scheduler.finish_io();
            }
            pump.pending_io = pump.pending_io.saturating_sub(reaped);

            if timed_out || Instant::now() >= deadline {
                return Ok(());
            }

            to_submit = self.slots.filled(pump.submitted);
        }

        // Nothing in flight and nothing to submit: sleep out the window so
        // the join loop keeps its cadence.
        thread::sleep(deadline.saturating_duration_since(Instant::now()));
        Ok(())
    }
}

impl fmt::Debug for ReadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadEngine")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
