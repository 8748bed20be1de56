//! A scheduler-aware mutual exclusion primitive.

use crate::future::try_yield;
use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A mutex whose contended async path runs queued tasks instead of blocking
/// the worker thread.
///
/// [`lock`](Mutex::lock) loops on [`try_yield`]: while the lock is held
/// elsewhere, the waiting coroutine lets the worker drain the main queue,
/// including, eventually, whatever task releases the lock. There is no waiter
/// queue and no fairness guarantee.
///
/// [`lock_blocking`](Mutex::lock_blocking) is the plain spinning variant for
/// code running outside a coroutine.
pub struct Mutex<T: ?Sized> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            .then_some(MutexGuard { mutex: self })
    }

    /// Acquires the lock from inside a coroutine, cooperatively yielding to
    /// queued tasks while contended.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            try_yield().await;
        }
    }

    /// Acquires the lock by spinning. Safe anywhere, but wastes the thread
    /// while contended; prefer [`lock`](Mutex::lock) inside coroutines.
    pub fn lock_blocking(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            hint::spin_loop();
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("value", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("value", &"<locked>").finish(),
        }
    }
}

pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::init;
    use anyhow::Result;
    use std::sync::Arc;

    #[test]
    fn test_try_lock_excludes() {
        let mutex = Mutex::new(1u32);

        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);

        assert_eq!(*mutex.try_lock().unwrap(), 1);
    }

    #[test]
    fn test_lock_blocking_across_threads() {
        let mutex = Arc::new(Mutex::new(0u64));
        let threads = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        *mutex.lock_blocking() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*mutex.lock_blocking(), 4_000);
    }

    #[test]
    fn test_coroutines_serialize_through_lock() -> Result<()> {
        const COROUTINES: u64 = 16;
        const INCREMENTS: u64 = 250;

        let pool = init(4)?;
        let total = Arc::new(Mutex::new(0u64));

        for _ in 0..COROUTINES {
            let total = Arc::clone(&total);
            pool.spawn(async move {
                for _ in 0..INCREMENTS {
                    let mut guard = total.lock().await;
                    *guard += 1;
                }
            });
        }
        pool.join();

        assert_eq!(*total.lock_blocking(), COROUTINES * INCREMENTS);
        Ok(())
    }
}
