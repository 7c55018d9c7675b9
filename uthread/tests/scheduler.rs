use std::cell::{Cell, RefCell};
use std::rc::Rc;

use uthread::interrupts::interrupts_enabled;
use uthread::{InterruptDisableGuard, RuntimeConfig, Target, ThreadError, ThreadId};

const STACK_SIZE: usize = 64 * 1024;

fn init(max_threads: usize) {
    let config = RuntimeConfig::builder()
        .max_threads(max_threads)
        .stack_size(STACK_SIZE)
        .build()
        .unwrap();
    uthread::init(config).unwrap();
}

/// runs every other thread until none is ready
fn join() {
    while uthread::yield_to(Target::Any).is_ok() {}
}

#[test]
fn not_initialized_by_default() {
    assert!(!uthread::is_initialized());
    init(4);
    assert!(uthread::is_initialized());
    assert_eq!(ThreadId::INITIAL, uthread::id());
    uthread::shutdown().unwrap();
    assert!(!uthread::is_initialized());
}

#[test]
fn init_twice_fails() {
    init(4);
    assert!(matches!(
        uthread::init(RuntimeConfig::default()),
        Err(uthread::InitError::AlreadyInitialized)
    ));
    uthread::shutdown().unwrap();

    init(4);
    uthread::shutdown().unwrap();
}

#[test]
fn init_rejects_invalid_config() {
    let config = RuntimeConfig {
        max_threads: 0,
        ..Default::default()
    };
    assert!(matches!(
        uthread::init(config),
        Err(uthread::InitError::Config(uthread::ConfigError::MaxThreads(0)))
    ));
    assert!(!uthread::is_initialized());
}

#[test]
fn yield_alone() {
    init(4);
    assert_eq!(Err(ThreadError::NoneReady), uthread::yield_to(Target::Any));
    assert_eq!(Err(ThreadError::NoneReady), uthread::yield_now());
    assert_eq!(Ok(ThreadId::INITIAL), uthread::yield_to(Target::Current));
    assert_eq!(Ok(ThreadId::INITIAL), uthread::yield_to(ThreadId::INITIAL));
    uthread::shutdown().unwrap();
}

#[test]
fn yield_to_invalid_keeps_ready_queue() {
    init(4);
    let a = uthread::create(|| {}).unwrap();
    let b = uthread::create(|| {}).unwrap();

    assert_eq!(Err(ThreadError::Invalid), uthread::yield_to(ThreadId::new(3)));
    assert_eq!(
        Err(ThreadError::Invalid),
        uthread::yield_to(ThreadId::new(10_000))
    );
    assert_eq!(vec![a, b], uthread::ready_threads());

    join();
    assert_eq!(Err(ThreadError::Invalid), uthread::yield_to(a));
    uthread::shutdown().unwrap();
}

#[test]
fn capacity() {
    init(4);
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(uthread::create(|| {}).unwrap());
    }
    assert_eq!(
        vec![ThreadId::new(1), ThreadId::new(2), ThreadId::new(3)],
        ids
    );
    assert_eq!(Err(ThreadError::NoMoreCapacity), uthread::create(|| {}));

    assert_eq!(Ok(ids[0]), uthread::kill(ids[0]));
    // destruction is deferred to the next suspension point
    assert!(uthread::is_alive(ids[0]));
    assert_eq!(Err(ThreadError::NoMoreCapacity), uthread::create(|| {}));

    assert_eq!(Ok(ThreadId::INITIAL), uthread::yield_to(Target::Current));
    assert!(!uthread::is_alive(ids[0]));
    assert_eq!(vec![ids[1], ids[2]], uthread::ready_threads());

    assert_eq!(Ok(ids[0]), uthread::create(|| {}));
    assert_eq!(Err(ThreadError::NoMoreCapacity), uthread::create(|| {}));

    join();
    uthread::shutdown().unwrap();
}

#[test]
fn round_robin() {
    init(8);
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let log = log.clone();
        ids.push(
            uthread::create(move || {
                for _ in 0..2 {
                    log.borrow_mut().push(uthread::id());
                    uthread::yield_now().unwrap();
                }
            })
            .unwrap(),
        );
    }

    assert_eq!(Ok(ids[0]), uthread::yield_now());
    assert_eq!(ids, *log.borrow());

    join();
    let expected: Vec<_> = ids.iter().chain(ids.iter()).copied().collect();
    assert_eq!(expected, *log.borrow());
    for id in ids {
        assert!(!uthread::is_alive(id));
    }

    uthread::shutdown().unwrap();
}

#[test]
fn yield_to_specific_thread() {
    init(8);
    let log = Rc::new(RefCell::new(Vec::new()));

    let a = {
        let log = log.clone();
        uthread::create(move || log.borrow_mut().push("a")).unwrap()
    };
    let b = {
        let log = log.clone();
        uthread::create(move || log.borrow_mut().push("b")).unwrap()
    };

    // b runs first, main takes its place behind a
    assert_eq!(Ok(b), uthread::yield_to(b));
    assert_eq!(vec!["b", "a"], *log.borrow());

    join();
    assert!(!uthread::is_alive(a));
    assert!(!uthread::is_alive(b));

    uthread::shutdown().unwrap();
}

#[test]
fn yield_reports_switched_to_thread() {
    init(8);
    let seen = Rc::new(Cell::new(None));

    let first = {
        let seen = seen.clone();
        uthread::create(move || seen.set(Some(uthread::yield_now()))).unwrap()
    };
    let second = uthread::create(|| {}).unwrap();

    assert_eq!(Ok(first), uthread::yield_now());
    join();
    assert_eq!(Some(Ok(second)), seen.get());

    uthread::shutdown().unwrap();
}

#[test]
fn kill_rejects_self_and_invalid() {
    init(4);
    assert_eq!(Err(ThreadError::Invalid), uthread::kill(ThreadId::INITIAL));
    assert_eq!(Err(ThreadError::Invalid), uthread::kill(ThreadId::new(2)));
    assert_eq!(Err(ThreadError::Invalid), uthread::kill(ThreadId::new(4)));

    let result = Rc::new(Cell::new(None));
    {
        let result = result.clone();
        uthread::create(move || result.set(Some(uthread::kill(uthread::id()))))
            .unwrap();
    }
    join();
    assert_eq!(Some(Err(ThreadError::Invalid)), result.get());

    uthread::shutdown().unwrap();
}

#[test]
fn kill_is_deferred() {
    init(4);
    let runs = Rc::new(Cell::new(0));

    let victim = {
        let runs = runs.clone();
        uthread::create(move || loop {
            runs.set(runs.get() + 1);
            uthread::yield_now().unwrap();
        })
        .unwrap()
    };

    assert_eq!(Ok(victim), uthread::yield_now());
    assert_eq!(1, runs.get());

    assert_eq!(Ok(victim), uthread::kill(victim));
    assert_eq!(Ok(victim), uthread::kill(victim));
    assert!(uthread::is_alive(victim));
    assert_eq!(vec![victim], uthread::ready_threads());

    // the drain destroys the victim before anything else is scheduled
    assert_eq!(Err(ThreadError::NoneReady), uthread::yield_now());
    assert_eq!(1, runs.get());
    assert!(!uthread::is_alive(victim));
    assert!(uthread::ready_threads().is_empty());

    uthread::shutdown().unwrap();
}

#[test]
fn killed_thread_leaves_wait_queue() {
    init(4);
    let queue = Rc::new(uthread::WaitQueue::new());

    let sleeper = {
        let queue = queue.clone();
        uthread::create(move || {
            uthread::sleep(&queue).unwrap();
        })
        .unwrap()
    };

    uthread::yield_now().unwrap();
    assert_eq!(1, queue.len());

    uthread::kill(sleeper).unwrap();
    uthread::yield_to(Target::Current).unwrap();
    assert!(!uthread::is_alive(sleeper));
    assert!(queue.is_empty());

    drop(queue);
    uthread::shutdown().unwrap();
}

#[test]
fn exit_alone_fails() {
    init(4);
    assert_eq!(Some(ThreadError::NoneReady), uthread::exit().err());
    assert!(uthread::is_alive(ThreadId::INITIAL));
    uthread::shutdown().unwrap();
}

#[test]
fn explicit_exit() {
    init(4);
    let after_exit = Rc::new(Cell::new(false));

    let id = {
        let after_exit = after_exit.clone();
        uthread::create(move || {
            let _ = uthread::exit();
            after_exit.set(true);
        })
        .unwrap()
    };

    join();
    assert!(!after_exit.get());
    assert!(!uthread::is_alive(id));
    uthread::shutdown().unwrap();
}

#[test]
fn interrupt_gate_follows_thread() {
    init(4);
    assert!(interrupts_enabled());
    let gates = Rc::new(RefCell::new(Vec::new()));

    {
        let gates = gates.clone();
        uthread::create(move || {
            gates.borrow_mut().push(interrupts_enabled());
            {
                let _guard = InterruptDisableGuard::new();
                uthread::yield_now().unwrap();
                gates.borrow_mut().push(interrupts_enabled());
            }
            uthread::yield_now().unwrap();
            gates.borrow_mut().push(interrupts_enabled());
        })
        .unwrap();
    }

    uthread::yield_now().unwrap();
    assert!(interrupts_enabled());

    let guard = InterruptDisableGuard::new();
    uthread::yield_now().unwrap();
    assert!(!interrupts_enabled());
    drop(guard);
    assert!(interrupts_enabled());

    join();
    assert_eq!(vec![true, false, true], *gates.borrow());
    uthread::shutdown().unwrap();
}

#[test]
fn entry_is_dropped_when_thread_finishes() {
    init(4);
    let captured = Rc::new(());

    let id = {
        let captured = captured.clone();
        uthread::create(move || {
            let _captured = &captured;
        })
        .unwrap()
    };
    assert_eq!(2, Rc::strong_count(&captured));

    join();
    assert!(!uthread::is_alive(id));
    assert_eq!(1, Rc::strong_count(&captured));
    uthread::shutdown().unwrap();
}

#[test]
fn exited_slot_is_reused() {
    init(4);
    let first = uthread::create(|| {}).unwrap();
    join();
    assert!(!uthread::is_alive(first));
    assert_eq!(Ok(first), uthread::create(|| {}));
    join();
    uthread::shutdown().unwrap();
}

#[test]
fn many_threads() {
    init(256);
    let counter = Rc::new(Cell::new(0));
    for _ in 0..200 {
        let counter = counter.clone();
        uthread::create(move || {
            counter.set(counter.get() + 1);
            uthread::yield_now().unwrap();
            counter.set(counter.get() + 1);
        })
        .unwrap();
    }
    join();
    assert_eq!(400, counter.get());
    uthread::shutdown().unwrap();
}

#[test]
fn stack_allocation_failure() {
    let config = RuntimeConfig::builder()
        .max_threads(4)
        .stack_size(1 << 50)
        .build()
        .unwrap();
    uthread::init(config).unwrap();

    assert_eq!(Err(ThreadError::NoMemory), uthread::create(|| {}));
    assert!(uthread::ready_threads().is_empty());
    assert!(!uthread::is_alive(ThreadId::new(1)));

    uthread::shutdown().unwrap();
}

#[test]
fn shutdown_requires_initial_thread() {
    init(4);
    let result = Rc::new(Cell::new(None));
    {
        let result = result.clone();
        uthread::create(move || result.set(Some(uthread::shutdown()))).unwrap();
    }
    join();
    assert_eq!(Some(Err(ThreadError::Failed)), result.get());
    uthread::shutdown().unwrap();
    assert_eq!(Err(ThreadError::Failed), uthread::shutdown());
}

#[test]
fn shutdown_drops_unstarted_entries() {
    init(4);
    let captured = Rc::new(());
    {
        let captured = captured.clone();
        uthread::create(move || drop(captured)).unwrap();
    }
    assert_eq!(2, Rc::strong_count(&captured));
    uthread::shutdown().unwrap();
    assert_eq!(1, Rc::strong_count(&captured));
}

#[test]
fn runtimes_are_per_os_thread() {
    init(4);
    let other = std::thread::spawn(|| {
        assert!(!uthread::is_initialized());
        init(2);
        let id = uthread::create(|| {}).unwrap();
        join();
        uthread::shutdown().unwrap();
        id
    })
    .join()
    .unwrap();

    assert_eq!(ThreadId::new(1), other);
    assert!(uthread::is_initialized());
    uthread::shutdown().unwrap();
}
