use crate::runtime::Pool;
use anyhow::{anyhow, Result};
use std::thread;

/// Timer workers drain only the timed queue; two keeps one available while
/// the other is stuck in a long-running resumed coroutine.
const TIMER_THREADS: usize = 2;

/// Default size of the submission slot ring and the kernel SQ ring.
const SQ_RING_SIZE: usize = 512;

/// Configures and starts a [`Pool`].
///
/// ```no_run
/// let pool = taskring::Builder::new()
///     .worker_threads(4)
///     .sq_ring_size(256)
///     .try_build()
///     .expect("failed to start pool");
/// # drop(pool);
/// ```
#[derive(Debug)]
pub struct Builder {
    /// The number of general worker threads.
    ///
    /// Defaults to 1 worker per CPU core.
    worker_threads: Option<usize>,

    /// The number of timer worker threads.
    timer_threads: usize,

    /// Size of the read engine's submission ring. Must be a power of two.
    sq_ring_size: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            timer_threads: TIMER_THREADS,
            sq_ring_size: SQ_RING_SIZE,
        }
    }

    /// Sets the number of general worker threads.
    ///
    /// # Panics
    ///
    /// This function will panic if 0 is passed as an argument.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "Worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the number of timer worker threads.
    ///
    /// # Panics
    ///
    /// This function will panic if 0 is passed as an argument.
    #[track_caller]
    pub fn timer_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "Timer threads cannot be set to 0");
        self.timer_threads = val;
        self
    }

    /// Sets the size of the submission slot ring backing `read_file`.
    pub fn sq_ring_size(mut self, val: usize) -> Self {
        self.sq_ring_size = val;
        self
    }

    /// Creates the configured [`Pool`].
    ///
    /// The returned pool is ready to accept tasks; dropping it joins all
    /// outstanding work and stops the workers.
    pub fn try_build(self) -> Result<Pool> {
        let cfg: RuntimeConfig = self.try_into()?;
        Pool::try_new(cfg)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts a pool with `n_threads` general workers; `0` means one per CPU
/// core. Equivalent to `Builder::new().worker_threads(n).try_build()`.
pub fn init(n_threads: usize) -> Result<Pool> {
    let mut builder = Builder::new();
    if n_threads > 0 {
        builder = builder.worker_threads(n_threads);
    }
    builder.try_build()
}

// Resolved builder values, consumed by the pool and its workers.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) timer_threads: usize,
    pub(crate) sq_ring_size: usize,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if !self.sq_ring_size.is_power_of_two() {
            return Err(anyhow!("sq_ring_size must be a power of two"));
        }

        // One slot is reserved for the pump's timeout entry.
        if self.sq_ring_size < 2 {
            return Err(anyhow!("sq_ring_size must be at least 2"));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            timer_threads: builder.timer_threads,
            sq_ring_size: builder.sq_ring_size,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // Config is cloned into every spawned worker thread.
    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);

    #[test]
    fn test_rejects_non_power_of_two_ring() {
        let res = Builder::new().sq_ring_size(100).try_build();
        assert!(res.is_err());
    }

    #[test]
    fn test_defaults_resolve() {
        let cfg: RuntimeConfig = Builder::new().try_into().unwrap();
        assert!(cfg.worker_threads > 0);
        assert_eq!(cfg.timer_threads, TIMER_THREADS);
        assert_eq!(cfg.sq_ring_size, SQ_RING_SIZE);
    }
}
