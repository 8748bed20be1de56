use crate::future::{sleep_for, sleep_until, try_yield, yield_now};
use crate::runtime::init;
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[rstest]
#[case::single_worker(1)]
#[case::two_workers(2)]
#[case::eight_workers(8)]
fn test_fan_out_fan_in(#[case] workers: usize) -> Result<()> {
    const TASKS: u32 = 10_000;

    let pool = init(workers)?;
    let counter = Arc::new(AtomicU32::new(0));

    for _ in 0..TASKS {
        let counter = Arc::clone(&counter);
        pool.enqueue(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.join();

    assert_eq!(counter.load(Ordering::Acquire), TASKS);
    assert_eq!(pool.pending_tasks(), 0);
    Ok(())
}

#[test]
fn test_yield_churn() -> Result<()> {
    const COROUTINES: u64 = 64;
    const YIELDS: u64 = 1_000;

    let pool = init(4)?;
    let yields = Arc::new(AtomicU64::new(0));
    let completed = Arc::new(AtomicU64::new(0));

    for _ in 0..COROUTINES {
        let yields = Arc::clone(&yields);
        let completed = Arc::clone(&completed);
        pool.spawn(async move {
            for _ in 0..YIELDS {
                yield_now().await;
                yields.fetch_add(1, Ordering::Relaxed);
            }
            completed.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.join();

    assert_eq!(yields.load(Ordering::Acquire), COROUTINES * YIELDS);
    assert_eq!(completed.load(Ordering::Acquire), COROUTINES);
    assert_eq!(pool.pending_tasks(), 0);
    Ok(())
}

// The two short sleepers must resume (in either order) before the long one.
#[test]
fn test_timed_ordering() -> Result<()> {
    let pool = init(2)?;
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    for (name, delay_ms) in [("a", 60u64), ("b", 20), ("c", 20)] {
        let order = Arc::clone(&order);
        pool.spawn(async move {
            sleep_for(Duration::from_millis(delay_ms)).await;
            order.lock().push(name);
        });
    }
    pool.join();

    let order = order.lock();
    assert_eq!(order.len(), 3);
    assert_eq!(order[2], "a");
    Ok(())
}

#[test]
fn test_sleep_for_duration_is_respected() -> Result<()> {
    let pool = init(2)?;
    let elapsed = Arc::new(Mutex::new(None));

    let duration = Duration::from_millis(50);
    {
        let elapsed = Arc::clone(&elapsed);
        pool.spawn(async move {
            let start = Instant::now();
            sleep_for(duration).await;
            *elapsed.lock() = Some(start.elapsed());
        });
    }
    pool.join();

    let elapsed = elapsed.lock().expect("coroutine never resumed");

    // The sleep must last *at least* the specified duration.
    assert!(
        elapsed >= duration,
        "sleep was shorter than requested: {:?} < {:?}",
        elapsed,
        duration
    );

    // Nor excessively longer. The margin is generous to keep the test from
    // flaking on loaded machines.
    let upper_bound = duration + Duration::from_millis(100);
    assert!(
        elapsed < upper_bound,
        "sleep overshot: {:?} >= {:?}",
        elapsed,
        upper_bound
    );
    Ok(())
}

#[test]
fn test_sleep_until_past_deadline_completes_inline() -> Result<()> {
    let pool = init(1)?;
    let resumed = Arc::new(AtomicBool::new(false));

    {
        let resumed = Arc::clone(&resumed);
        pool.spawn(async move {
            sleep_until(Instant::now() - Duration::from_millis(10)).await;
            resumed.store(true, Ordering::Release);
        });
    }
    pool.join();

    assert!(resumed.load(Ordering::Acquire));
    Ok(())
}

#[test]
fn test_enqueue_after_runs_no_earlier_than_delay() -> Result<()> {
    let pool = init(1)?;
    let start = Instant::now();
    let ran_after = Arc::new(Mutex::new(None));

    let delay = Duration::from_millis(30);
    {
        let ran_after = Arc::clone(&ran_after);
        pool.enqueue_after(delay, move || {
            *ran_after.lock() = Some(start.elapsed());
        });
    }
    pool.join();

    let ran_after = ran_after.lock().expect("delayed task never ran");
    assert!(ran_after >= delay, "{:?} < {:?}", ran_after, delay);
    Ok(())
}

#[test]
fn test_enqueue_at_orders_against_plain_enqueue() -> Result<()> {
    let pool = init(1)?;
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let order = Arc::clone(&order);
        pool.enqueue_at(Instant::now() + Duration::from_millis(30), move || {
            order.lock().push(2);
        });
    }
    {
        let order = Arc::clone(&order);
        pool.enqueue(move || order.lock().push(1));
    }
    pool.join();

    assert_eq!(*order.lock(), vec![1, 2]);
    Ok(())
}

// With one worker, the task enqueued before `try_yield` is still in the main
// queue when the coroutine polls, so it must be stolen into the worker's slot
// and run before the coroutine resumes.
#[test]
fn test_try_yield_runs_queued_task_first() -> Result<()> {
    let pool = init(1)?;
    let side_task_ran = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicBool::new(false));

    {
        let side_task_ran = Arc::clone(&side_task_ran);
        let observed = Arc::clone(&observed);
        pool.spawn(async move {
            {
                let side_task_ran = Arc::clone(&side_task_ran);
                crate::runtime::enqueue(move || {
                    side_task_ran.store(true, Ordering::Release);
                });
            }

            let yielded = try_yield().await;
            assert!(yielded, "a task was queued, try_yield must suspend");
            observed.store(side_task_ran.load(Ordering::Acquire), Ordering::Release);
        });
    }
    pool.join();

    assert!(observed.load(Ordering::Acquire));
    Ok(())
}

#[test]
fn test_try_yield_on_empty_queue_returns_false() -> Result<()> {
    let pool = init(1)?;
    let yielded = Arc::new(AtomicBool::new(true));

    {
        let yielded = Arc::clone(&yielded);
        pool.spawn(async move {
            yielded.store(try_yield().await, Ordering::Release);
        });
    }
    pool.join();

    assert!(!yielded.load(Ordering::Acquire));
    Ok(())
}

#[test]
fn test_tasks_can_enqueue_and_spawn_from_workers() -> Result<()> {
    let pool = init(2)?;
    let counter = Arc::new(AtomicU32::new(0));

    {
        let counter = Arc::clone(&counter);
        pool.enqueue(move || {
            let inner = Arc::clone(&counter);
            crate::runtime::enqueue(move || {
                inner.fetch_add(1, Ordering::Relaxed);
            });

            let inner = Arc::clone(&counter);
            crate::runtime::spawn(async move {
                yield_now().await;
                inner.fetch_add(1, Ordering::Relaxed);
            });
        });
    }
    pool.join();

    assert_eq!(counter.load(Ordering::Acquire), 2);
    assert_eq!(pool.pending_tasks(), 0);
    Ok(())
}

#[test]
fn test_panicking_task_trips_shutdown() -> Result<()> {
    let pool = init(2)?;
    let ran = Arc::new(AtomicU32::new(0));

    for _ in 0..8 {
        let ran = Arc::clone(&ran);
        pool.enqueue(move || {
            ran.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.enqueue(|| panic!("deliberate test panic"));

    // Must return rather than hang or abort the process.
    pool.join();

    assert!(pool.scheduler().is_quitting());
    // Tasks scheduled before the panic either ran or were skipped.
    assert!(ran.load(Ordering::Acquire) <= 8);
    Ok(())
}

#[test]
fn test_independent_pools_coexist() -> Result<()> {
    let first = init(2)?;
    let second = init(2)?;

    let a = Arc::new(AtomicU32::new(0));
    let b = Arc::new(AtomicU32::new(0));

    for _ in 0..100 {
        let a = Arc::clone(&a);
        first.enqueue(move || {
            a.fetch_add(1, Ordering::Relaxed);
        });
        let b = Arc::clone(&b);
        second.spawn(async move {
            yield_now().await;
            b.fetch_add(1, Ordering::Relaxed);
        });
    }

    first.join();
    second.join();

    assert_eq!(a.load(Ordering::Acquire), 100);
    assert_eq!(b.load(Ordering::Acquire), 100);
    Ok(())
}

#[test]
fn test_drop_without_work_terminates_cleanly() -> Result<()> {
    let pool = init(2)?;
    drop(pool);
    Ok(())
}

// Mixed load: sleeps, yields, plain tasks and nested spawns all settle.
#[test]
fn test_mixed_workload_settles() -> Result<()> {
    let pool = init(4)?;
    let counter = Arc::new(AtomicU32::new(0));

    for i in 0..50u64 {
        let counter_spawn = Arc::clone(&counter);
        pool.spawn(async move {
            sleep_for(Duration::from_millis(i % 7)).await;
            yield_now().await;
            counter_spawn.fetch_add(1, Ordering::Relaxed);
        });

        let counter_enqueue = Arc::clone(&counter);
        pool.enqueue(move || {
            counter_enqueue.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.join();

    assert_eq!(counter.load(Ordering::Acquire), 100);
    assert_eq!(pool.pending_tasks(), 0);
    Ok(())
}
