//! Demo workloads for the uthread runtime
//!
//! Every demo expects an initialized runtime and returns once all threads it
//! created are done.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::hint::spin_loop;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use log::{debug, info, trace};
use uthread::{CondVar, Lock, Target, ThreadId};

/// Runs every other thread until none is ready
pub fn join() {
    while uthread::yield_to(Target::Any).is_ok() {}
}

fn spawn<F: FnOnce() + 'static>(entry: F) -> Result<ThreadId> {
    let id = uthread::create(entry).context("failed to create thread")?;
    debug!("created thread {id}");
    Ok(id)
}

/// Threads take turns. Returns the order in which they ran.
pub fn rotate(threads: usize, rounds: usize) -> Result<Vec<ThreadId>> {
    let order = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..threads {
        let order = order.clone();
        spawn(move || {
            for round in 0..rounds {
                let id = uthread::id();
                info!("thread {id}: round {round}");
                order.borrow_mut().push(id);
                let _ = uthread::yield_now();
            }
        })?;
    }

    join();

    let order = order.take();
    ensure!(
        order.len() == threads * rounds,
        "expected {} turns, got {}",
        threads * rounds,
        order.len()
    );
    Ok(order)
}

/// Increments a shared counter under a [Lock]. The critical section yields
/// between reading and writing the counter.
pub fn counter(threads: usize, increments: usize) -> Result<usize> {
    let lock = Rc::new(Lock::new());
    let counter = Rc::new(Cell::new(0));

    for _ in 0..threads {
        let lock = lock.clone();
        let counter = counter.clone();
        spawn(move || {
            for _ in 0..increments {
                let _guard = lock.lock();
                let value = counter.get();
                let _ = uthread::yield_now();
                counter.set(value + 1);
            }
        })?;
    }

    join();

    let total = counter.get();
    ensure!(
        total == threads * increments,
        "lost updates: expected {}, got {total}",
        threads * increments
    );
    Ok(total)
}

struct BoundedBuffer {
    lock: Lock,
    not_full: CondVar,
    not_empty: CondVar,
    items: RefCell<VecDeque<u64>>,
    capacity: usize,
    /// items still to be produced by all producers
    remaining: Cell<usize>,
}

/// Result of [buffer]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferReport {
    pub consumed: usize,
    pub checksum: u64,
}

/// Producers and consumers share a bounded buffer guarded by a lock and two
/// condition variables.
pub fn buffer(
    producers: usize,
    consumers: usize,
    items: usize,
    capacity: usize,
) -> Result<BufferReport> {
    ensure!(capacity > 0, "buffer capacity must not be zero");

    let buffer = Rc::new(BoundedBuffer {
        lock: Lock::new(),
        not_full: CondVar::new(),
        not_empty: CondVar::new(),
        items: RefCell::new(VecDeque::with_capacity(capacity)),
        capacity,
        remaining: Cell::new(producers * items),
    });
    let consumed = Rc::new(Cell::new(0usize));
    let checksum = Rc::new(Cell::new(0u64));

    for _ in 0..producers {
        let buffer = buffer.clone();
        spawn(move || {
            for item in 0..items as u64 {
                let _guard = buffer.lock.lock();
                while buffer.items.borrow().len() == buffer.capacity {
                    buffer.not_full.wait(&buffer.lock);
                }
                buffer.items.borrow_mut().push_back(item);
                buffer.remaining.set(buffer.remaining.get() - 1);
                trace!("thread {} produced {item}", uthread::id());

                if buffer.remaining.get() == 0 {
                    // wake consumers waiting for items that never come
                    buffer.not_empty.broadcast(&buffer.lock);
                } else {
                    buffer.not_empty.signal(&buffer.lock);
                }
            }
        })?;
    }

    for _ in 0..consumers {
        let buffer = buffer.clone();
        let consumed = consumed.clone();
        let checksum = checksum.clone();
        spawn(move || loop {
            let _guard = buffer.lock.lock();
            while buffer.items.borrow().is_empty() && buffer.remaining.get() > 0 {
                buffer.not_empty.wait(&buffer.lock);
            }
            let Some(item) = buffer.items.borrow_mut().pop_front() else {
                break;
            };
            consumed.set(consumed.get() + 1);
            checksum.set(checksum.get() + item);
            trace!("thread {} consumed {item}", uthread::id());
            buffer.not_full.signal(&buffer.lock);
        })?;
    }

    join();

    let report = BufferReport {
        consumed: consumed.get(),
        checksum: checksum.get(),
    };
    let per_producer: u64 = (0..items as u64).sum();
    ensure!(
        report.consumed == producers * items,
        "expected {} items, consumed {}",
        producers * items,
        report.consumed
    );
    ensure!(
        report.checksum == per_producer * producers as u64,
        "checksum mismatch"
    );
    Ok(report)
}

/// Wakes every waiter of a condition variable with a single token available.
///
/// Returns how many waiters went back to sleep after the broadcast. With Mesa
/// semantics that is all but one.
pub fn mesa(waiters: usize) -> Result<usize> {
    let lock = Rc::new(Lock::new());
    let cv = Rc::new(CondVar::new());
    let tokens = Rc::new(Cell::new(0usize));
    let served = Rc::new(Cell::new(0usize));

    for _ in 0..waiters {
        let lock = lock.clone();
        let cv = cv.clone();
        let tokens = tokens.clone();
        let served = served.clone();
        spawn(move || {
            let _guard = lock.lock();
            let mut wakeups = 0;
            while tokens.get() == 0 {
                cv.wait(&lock);
                wakeups += 1;
            }
            tokens.set(tokens.get() - 1);
            served.set(served.get() + 1);
            info!("thread {} got a token after {wakeups} wakeups", uthread::id());
        })?;
    }

    join();
    ensure!(cv.waiter_count() == waiters, "not every thread is waiting");

    {
        let _guard = lock.lock();
        tokens.set(1);
        let woken = cv.broadcast(&lock);
        info!("broadcast woke {woken} threads for one token");
    }
    join();

    let reblocked = cv.waiter_count();
    ensure!(served.get() == 1, "exactly one thread should get the token");

    {
        let _guard = lock.lock();
        tokens.set(reblocked);
        cv.broadcast(&lock);
    }
    join();
    ensure!(served.get() == waiters, "not every waiter was served");

    Ok(reblocked)
}

/// Threads spin without ever yielding and only make progress through timer
/// preemption. Returns the number of iterations of each thread.
///
/// The runtime must have been initialized with a preemption interval.
pub fn preempt(threads: usize, duration: Duration) -> Result<Vec<u64>> {
    let counts: Rc<Vec<AtomicU64>> = Rc::new((0..threads).map(|_| AtomicU64::new(0)).collect());
    let stop = Rc::new(AtomicBool::new(false));

    for index in 0..threads {
        let counts = counts.clone();
        let stop = stop.clone();
        // nothing in here allocates, the thread can be interrupted anywhere
        spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                counts[index].fetch_add(1, Ordering::Relaxed);
                spin_loop();
            }
        })?;
    }

    let start = Instant::now();
    while start.elapsed() < duration {
        spin_loop();
    }
    stop.store(true, Ordering::Relaxed);
    join();

    let counts: Vec<u64> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    ensure!(
        counts.iter().all(|&count| count > 0),
        "some threads never ran: {counts:?}"
    );
    Ok(counts)
}
