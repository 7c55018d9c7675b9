use std::cell::{Cell, RefCell};
use std::rc::Rc;

use uthread::{CondVar, Lock, RuntimeConfig, Target, ThreadError, WaitQueue};

fn init() {
    let config = RuntimeConfig::builder()
        .max_threads(16)
        .stack_size(64 * 1024)
        .build()
        .unwrap();
    uthread::init(config).unwrap();
}

fn join() {
    while uthread::yield_to(Target::Any).is_ok() {}
}

#[test]
fn sleep_alone_fails() {
    init();
    let queue = WaitQueue::new();
    assert_eq!(Err(ThreadError::NoneReady), uthread::sleep(&queue));
    assert!(queue.is_empty());
    assert_eq!(0, uthread::wakeup(&queue, true));
    drop(queue);
    uthread::shutdown().unwrap();
}

#[test]
fn stale_wait_queue_is_invalid() {
    init();
    let queue = WaitQueue::new();
    uthread::shutdown().unwrap();

    init();
    uthread::create(|| {}).unwrap();
    assert_eq!(Err(ThreadError::Invalid), uthread::sleep(&queue));
    assert_eq!(0, uthread::wakeup(&queue, true));
    drop(queue);
    join();
    uthread::shutdown().unwrap();
}

#[test]
fn wakeup_is_fifo() {
    init();
    let queue = Rc::new(WaitQueue::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let queue = queue.clone();
        let log = log.clone();
        ids.push(
            uthread::create(move || {
                uthread::sleep(&queue).unwrap();
                log.borrow_mut().push(uthread::id());
            })
            .unwrap(),
        );
    }

    while queue.len() < 3 {
        uthread::yield_now().unwrap();
    }
    assert!(uthread::ready_threads().is_empty());

    assert_eq!(1, uthread::wakeup(&queue, false));
    assert_eq!(vec![ids[0]], uthread::ready_threads());
    assert_eq!(2, uthread::wakeup(&queue, true));
    assert_eq!(0, uthread::wakeup(&queue, true));

    join();
    assert_eq!(ids, *log.borrow());
    uthread::shutdown().unwrap();
}

#[test]
fn killed_sleeper_keeps_wakeup_order() {
    init();
    let queue = Rc::new(WaitQueue::new());

    let mut ids = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        ids.push(
            uthread::create(move || {
                uthread::sleep(&queue).unwrap();
            })
            .unwrap(),
        );
    }

    while queue.len() < 4 {
        uthread::yield_now().unwrap();
    }

    uthread::kill(ids[2]).unwrap();
    uthread::yield_to(Target::Current).unwrap();
    assert!(!uthread::is_alive(ids[2]));
    assert_eq!(3, queue.len());

    let mut woken = Vec::new();
    while uthread::wakeup(&queue, false) == 1 {
        woken.extend(uthread::ready_threads());
        join();
    }
    assert_eq!(vec![ids[0], ids[1], ids[3]], woken);

    drop(queue);
    uthread::shutdown().unwrap();
}

#[test]
#[should_panic(expected = "parked threads")]
fn drop_wait_queue_with_sleepers() {
    init();
    let queue = WaitQueue::new();
    let queue_ptr: *const WaitQueue = &queue;

    uthread::create(move || {
        let queue = unsafe { &*queue_ptr };
        uthread::sleep(queue).unwrap();
    })
    .unwrap();

    uthread::yield_now().unwrap();
    assert_eq!(1, queue.len());
    drop(queue);
}

#[test]
fn mutual_exclusion() {
    init();
    let lock = Rc::new(Lock::new());
    let counter = Rc::new(Cell::new(0));

    for _ in 0..3 {
        let lock = lock.clone();
        let counter = counter.clone();
        uthread::create(move || {
            for _ in 0..1000 {
                lock.acquire();
                let value = counter.get();
                uthread::yield_now().unwrap();
                counter.set(value + 1);
                lock.release();
            }
        })
        .unwrap();
    }

    join();
    assert_eq!(3000, counter.get());
    assert_eq!(None, lock.owner());
    uthread::shutdown().unwrap();
}

#[test]
fn lock_guard_releases() {
    init();
    let lock = Lock::new();
    {
        let guard = lock.lock();
        assert!(guard.lock().is_held_by_current());
        assert_eq!(Some(uthread::id()), lock.owner());
    }
    assert!(!lock.is_held_by_current());
    assert_eq!(None, lock.owner());
    drop(lock);
    uthread::shutdown().unwrap();
}

#[test]
fn waiter_gets_lock_after_release() {
    init();
    let lock = Rc::new(Lock::new());
    let owner = Rc::new(Cell::new(None));

    lock.acquire();
    let waiter = {
        let lock = lock.clone();
        let owner = owner.clone();
        uthread::create(move || {
            let _guard = lock.lock();
            owner.set(lock.owner());
        })
        .unwrap()
    };

    // the waiter parks on the lock
    uthread::yield_now().unwrap();
    assert_eq!(None, owner.get());
    assert!(uthread::ready_threads().is_empty());

    lock.release();
    assert_eq!(vec![waiter], uthread::ready_threads());
    join();
    assert_eq!(Some(waiter), owner.get());
    uthread::shutdown().unwrap();
}

#[test]
#[should_panic(expected = "released a lock")]
fn release_without_holding() {
    init();
    let lock = Lock::new();
    lock.release();
}

#[test]
#[should_panic(expected = "destroying a lock")]
fn drop_held_lock() {
    init();
    let lock = Lock::new();
    lock.acquire();
    drop(lock);
}

#[test]
#[should_panic(expected = "deadlock")]
fn acquire_held_lock_alone() {
    init();
    let lock = Lock::new();
    lock.acquire();
    lock.acquire();
}

#[test]
fn mesa_broadcast() {
    init();
    let lock = Rc::new(Lock::new());
    let cv = Rc::new(CondVar::new());
    let tokens = Rc::new(Cell::new(0));
    let consumed = Rc::new(Cell::new(0));

    for _ in 0..3 {
        let lock = lock.clone();
        let cv = cv.clone();
        let tokens = tokens.clone();
        let consumed = consumed.clone();
        uthread::create(move || {
            lock.acquire();
            while tokens.get() == 0 {
                cv.wait(&lock);
            }
            tokens.set(tokens.get() - 1);
            consumed.set(consumed.get() + 1);
            lock.release();
        })
        .unwrap();
    }

    while cv.waiter_count() < 3 {
        uthread::yield_now().unwrap();
    }

    lock.acquire();
    tokens.set(1);
    assert_eq!(3, cv.broadcast(&lock));
    lock.release();

    join();
    assert_eq!(1, consumed.get());
    assert_eq!(2, cv.waiter_count());

    lock.acquire();
    tokens.set(2);
    assert_eq!(2, cv.broadcast(&lock));
    lock.release();

    join();
    assert_eq!(3, consumed.get());
    assert_eq!(0, cv.waiter_count());
    uthread::shutdown().unwrap();
}

#[test]
fn signal_wakes_one() {
    init();
    let lock = Rc::new(Lock::new());
    let cv = Rc::new(CondVar::new());
    let woken = Rc::new(Cell::new(0));

    for _ in 0..2 {
        let lock = lock.clone();
        let cv = cv.clone();
        let woken = woken.clone();
        uthread::create(move || {
            let _guard = lock.lock();
            cv.wait(&lock);
            woken.set(woken.get() + 1);
        })
        .unwrap();
    }

    join();
    assert_eq!(2, cv.waiter_count());

    {
        let _guard = lock.lock();
        assert_eq!(1, cv.signal(&lock));
    }
    join();
    assert_eq!(1, woken.get());
    assert_eq!(1, cv.waiter_count());

    {
        let _guard = lock.lock();
        assert_eq!(1, cv.signal(&lock));
        assert_eq!(0, cv.signal(&lock));
    }
    join();
    assert_eq!(2, woken.get());
    uthread::shutdown().unwrap();
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn wait_without_lock() {
    init();
    let lock = Lock::new();
    let cv = CondVar::new();
    cv.wait(&lock);
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn signal_without_lock() {
    init();
    let lock = Lock::new();
    let cv = CondVar::new();
    cv.signal(&lock);
}

#[test]
#[should_panic(expected = "waiting threads")]
fn drop_condvar_with_waiters() {
    init();
    let lock = Lock::new();
    let cv = CondVar::new();
    let lock_ptr: *const Lock = &lock;
    let cv_ptr: *const CondVar = &cv;

    uthread::create(move || {
        let (lock, cv) = unsafe { (&*lock_ptr, &*cv_ptr) };
        lock.acquire();
        cv.wait(lock);
    })
    .unwrap();

    uthread::yield_now().unwrap();
    assert_eq!(1, cv.waiter_count());
    drop(cv);
}
