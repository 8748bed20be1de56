//! Thin wrappers over the `futex(2)` syscall, used as the wait-on-address
//! primitive for queue slots. Waiters block on a 32-bit word while it holds an
//! expected value; wakers publish a new value first, then wake.

use std::ptr;
use std::sync::atomic::AtomicU32;

/// Blocks the calling thread while `*atom == expected`.
///
/// Returns on wake-up, on a spurious `EINTR`, or immediately with `EAGAIN` if
/// the word already changed. All three cases mean the same thing to callers:
/// reload the word and re-check.
pub(crate) fn wait(atom: &AtomicU32, expected: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atom.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            ptr::null::<libc::timespec>(),
        );
    }
}

/// Wakes every thread blocked in [`wait`] on `atom`.
pub(crate) fn wake_all(atom: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atom.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            libc::c_int::MAX,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let atom = AtomicU32::new(1);
        // Expected value does not match, must not block.
        wait(&atom, 0);
    }

    #[test]
    fn test_wake_unblocks_waiter() {
        let atom = Arc::new(AtomicU32::new(0));

        let waiter = {
            let atom = Arc::clone(&atom);
            thread::spawn(move || {
                while atom.load(Ordering::Acquire) == 0 {
                    wait(&atom, 0);
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        atom.store(1, Ordering::Release);
        wake_all(&atom);

        waiter.join().unwrap();
    }
}
