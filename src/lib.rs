//! A multi-threaded task scheduler with io_uring-backed file reads and a
//! time-ordered delay queue, exposed through a cooperative coroutine model.
//!
//! Plain callables and coroutines share two bounded MPMC ring queues: general
//! workers drain the main queue, timer workers drain tasks released by the
//! delay store. Inside a coroutine, [`yield_now`], [`try_yield`],
//! [`sleep_for`], [`sleep_until`] and [`read_file`] are the only suspension
//! points; file reads go through a submission slot ring pumped by whichever
//! thread calls [`Pool::join`].
//!
//! ```no_run
//! let pool = taskring::init(0).expect("failed to start pool");
//!
//! pool.enqueue(|| println!("plain task"));
//! pool.spawn(async {
//!     taskring::yield_now().await;
//!     let bytes = taskring::read_file("/etc/hostname").await.unwrap();
//!     println!("{}", String::from_utf8_lossy(&bytes));
//! });
//!
//! pool.join();
//! ```

pub mod future;
pub use future::{read_file, sleep_for, sleep_until, try_yield, yield_now};

pub mod runtime;
pub use runtime::{enqueue, init, spawn, Builder, Pool};

pub mod sync;

pub(crate) mod context;
pub(crate) mod queue;
pub(crate) mod task;
pub(crate) mod timer;
pub(crate) mod uring;
pub(crate) mod utils;
