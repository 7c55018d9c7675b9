//! The thread runtime
//!
//! Every OS thread can host one [Runtime]. [init] adopts the calling context as
//! thread `0`. Further threads are started with [create], each on its own
//! [GuardedStack]. Threads only switch in [yield_to], [exit] and
//! [sleep](crate::sleep), all of which go through [Runtime::switch_to] and
//! [Switch::perform].
//!
//! A thread can not free the stack it is running on. Exiting threads therefore
//! put themselves into the kill queue, and the next suspension point of
//! another thread destroys them.

mod context;
mod stack;

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, trace, warn};
use shared::ring_queue::RingQueue;

use crate::config::RuntimeConfig;
use crate::error::{InitError, ThreadError};
use crate::interrupts::{self, InterruptDisableGuard};
use crate::preempt::Preemption;

use context::{Context, Resumed};
pub use stack::page_size;
use stack::GuardedStack;

/// Identifies a thread of the runtime.
///
/// Ids are slot indices and are reused once a thread is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The thread that called [init]
    pub const INITIAL: ThreadId = ThreadId(0);

    /// Creates a [ThreadId] from a raw slot index.
    ///
    /// The id is not checked. Operations on an id that does not name a live
    /// thread fail with [ThreadError::Invalid].
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the inner value
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The thread [yield_to] switches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// the thread at the front of the ready queue
    Any,
    /// the calling thread itself
    Current,
    /// a specific ready thread
    Id(ThreadId),
}

impl From<ThreadId> for Target {
    fn from(value: ThreadId) -> Self {
        Target::Id(value)
    }
}

/// Scheduling state of a live thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    /// in the ready queue
    Ready,
    /// the current thread
    Running,
    /// parked on the wait queue with the given index
    Parked(usize),
    /// called [exit] and waits in the kill queue
    Exited,
}

/// A thread control block
struct Thread {
    /// where the thread continues once resumed
    context: Context,

    /// the stack used by the thread
    ///
    /// `None` for the thread adopted by [init], which runs on the stack of the
    /// OS thread.
    stack: Option<GuardedStack>,

    /// entry closure, taken when the thread first runs
    entry: Option<Box<dyn FnMut()>>,

    state: ThreadState,

    /// Set when the thread suspends and cleared when it is resumed.
    ///
    /// Only suspended threads may be switched to and every suspension is
    /// resumed at most once.
    suspended: bool,
}

/// Identifies a wait queue registered in a [Runtime]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitQueueKey {
    runtime: u64,
    index: usize,
}

/// the id of the next [Runtime]. Used to detect wait queue handles that
/// outlived their runtime.
static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Runs `f` on the runtime of this OS thread.
///
/// The interrupt gate must be closed. `f` must not switch threads.
///
/// # Panics
///
/// if the runtime is not initialized
pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with_borrow_mut(|runtime| {
        let runtime = runtime
            .as_mut()
            .expect("thread runtime is not initialized on this OS thread");
        f(runtime)
    })
}

/// Like [with_runtime], but returns `None` if there is no runtime, it is
/// already borrowed, or it is being torn down.
pub(crate) fn try_with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
    RUNTIME
        .try_with(|runtime| {
            let mut runtime = runtime.try_borrow_mut().ok()?;
            runtime.as_mut().map(f)
        })
        .ok()
        .flatten()
}

/// The scheduler state of one OS thread
pub(crate) struct Runtime {
    id: u64,
    config: RuntimeConfig,

    /// the thread currently executing
    current: ThreadId,

    /// control blocks, indexed by [ThreadId]. `None` marks a free slot.
    threads: Box<[Option<Thread>]>,

    /// every thread eligible to run, except [Self::current]
    ready: RingQueue<ThreadId>,

    /// threads to destroy at the next suspension point. Holds every id at
    /// most once.
    kill: RingQueue<ThreadId>,

    /// queues of parked threads, indexed by [WaitQueueKey::index]
    wait_queues: Vec<Option<RingQueue<ThreadId>>>,
    free_wait_queues: Vec<usize>,

    preemption: Option<Preemption>,
}

/// A pending switch from the current thread to another.
///
/// Created with the runtime borrowed and performed after the borrow is
/// released, while the interrupt gate is still closed.
#[must_use]
struct Switch {
    save: *mut Context,
    load: *const Context,
    from: ThreadId,
    to: ThreadId,
}

impl Switch {
    /// Switches threads and returns the id of the thread switched to, once the
    /// calling thread is resumed.
    fn perform(self) -> ThreadId {
        trace!("switch {} -> {}", self.from, self.to);
        let Resumed(by) = unsafe {
            // Safety: save and load point into the thread table. `load` is
            // suspended (checked in switch_to) and its stack is owned by its
            // control block, which is only destroyed by a different thread.
            context::switch(self.save, self.load, self.from.0)
        };
        with_runtime(|runtime| runtime.resume_current(ThreadId(by)));
        self.to
    }
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        let mut threads: Box<[Option<Thread>]> = (0..config.max_threads).map(|_| None).collect();
        threads[ThreadId::INITIAL.0] = Some(Thread {
            context: Context::empty(),
            stack: None,
            entry: None,
            state: ThreadState::Running,
            suspended: false,
        });

        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            ready: RingQueue::with_capacity(config.max_threads),
            kill: RingQueue::with_capacity(config.max_threads),
            threads,
            current: ThreadId::INITIAL,
            wait_queues: Vec::new(),
            free_wait_queues: Vec::new(),
            preemption: None,
            config,
        }
    }

    fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id.0).and_then(Option::as_ref)
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.threads
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("thread {id} does not exist"))
    }

    pub(crate) fn current(&self) -> ThreadId {
        self.current
    }

    fn is_alive(&self, id: ThreadId) -> bool {
        self.thread(id).is_some()
    }

    /// Reserves a slot and a stack for a new thread and makes it ready.
    ///
    /// On failure nothing is changed and the entry is handed back.
    fn create(
        &mut self,
        entry: Box<dyn FnMut()>,
    ) -> Result<ThreadId, (ThreadError, Box<dyn FnMut()>)> {
        let Some(slot) = self.threads.iter().position(Option::is_none) else {
            return Err((ThreadError::NoMoreCapacity, entry));
        };
        let id = ThreadId(slot);

        let stack = match GuardedStack::allocate(self.config.stack_size, self.config.stack_guard) {
            Ok(stack) => stack,
            Err(e) => {
                warn!("failed to allocate stack for thread {id}: {e}");
                return Err((ThreadError::NoMemory, entry));
            }
        };

        let context = Context::prepare(&stack, thread_main);
        debug!(
            "new thread {id} with {} byte stack at {:#x}, guard page: {}",
            stack.size(),
            stack.bottom(),
            stack.has_guard()
        );

        self.threads[slot] = Some(Thread {
            context,
            stack: Some(stack),
            entry: Some(entry),
            state: ThreadState::Ready,
            suspended: true,
        });
        self.ready.enqueue(id);

        Ok(id)
    }

    /// Destroys every thread in the kill queue, except the current one.
    ///
    /// The current thread can not free its own stack. Its entry survives this
    /// pass and is consumed by a drain on another thread.
    ///
    /// Returns the destroyed control blocks. They must be dropped after the
    /// runtime borrow is released, as dropping an entry closure may run
    /// arbitrary destructors.
    fn drain_kill_queue(&mut self) -> Vec<Thread> {
        let mut reaped = Vec::new();
        let mut spared_self = false;

        while let Some(id) = self.kill.pop_front() {
            if id == self.current {
                self.kill.enqueue(id);
                if spared_self {
                    break;
                }
                spared_self = true;
            } else if let Some(thread) = self.destroy(id) {
                reaped.push(thread);
            }
        }

        reaped
    }

    /// Removes a thread from the table and from every queue it is in.
    fn destroy(&mut self, id: ThreadId) -> Option<Thread> {
        assert_ne!(id, self.current, "thread {id} can not destroy itself");

        let thread = self.threads.get_mut(id.0)?.take()?;
        match thread.state {
            ThreadState::Parked(queue) => {
                if let Some(Some(queue)) = self.wait_queues.get_mut(queue) {
                    queue.remove_ordered(id);
                }
            }
            ThreadState::Ready => {
                self.ready.remove_first(id);
            }
            ThreadState::Running | ThreadState::Exited => {}
        }
        debug!("destroyed thread {id}");

        Some(thread)
    }

    /// Marks the current thread suspended and `target` running.
    ///
    /// The caller is responsible for putting the current thread into the right
    /// queue before.
    fn switch_to(&mut self, target: ThreadId) -> Switch {
        let from = self.current;

        let save = {
            let thread = self.thread_mut(from);
            assert!(!thread.suspended, "running thread {from} is marked suspended");
            thread.suspended = true;
            &mut thread.context as *mut Context
        };

        let load = {
            let thread = self.thread_mut(target);
            assert!(
                thread.suspended,
                "switching to thread {target}, which is not suspended"
            );
            // a thread switching to itself saves its context right before loading it
            debug_assert!(target == from || !thread.context.is_empty());
            thread.state = ThreadState::Running;
            &thread.context as *const Context
        };

        self.current = target;

        Switch {
            save,
            load,
            from,
            to: target,
        }
    }

    /// Called by the current thread right after it was switched to.
    fn resume_current(&mut self, by: ThreadId) {
        let current = self.current;
        let thread = self.thread_mut(current);
        assert!(thread.suspended, "thread {current} was resumed twice");
        thread.suspended = false;
        trace!("thread {current} resumed by {by}");
    }

    fn prepare_yield(&mut self, target: Target) -> Result<Switch, ThreadError> {
        let current = self.current;

        let next = match target {
            Target::Any => {
                let next = self.ready.pop_front().ok_or(ThreadError::NoneReady)?;
                self.ready.enqueue(current);
                next
            }
            Target::Current => current,
            Target::Id(id) if id == current => current,
            Target::Id(id) => {
                match self.thread(id) {
                    Some(thread) if thread.state == ThreadState::Ready => {}
                    _ => return Err(ThreadError::Invalid),
                }
                let replaced = self.ready.replace_first(id, current);
                assert!(replaced, "ready thread {id} is missing from the ready queue");
                id
            }
        };

        if next != current {
            self.thread_mut(current).state = ThreadState::Ready;
        }

        Ok(self.switch_to(next))
    }

    fn prepare_exit(&mut self) -> Result<Switch, ThreadError> {
        let current = self.current;
        let next = self.ready.pop_front().ok_or(ThreadError::NoneReady)?;

        if !self.kill.contains(current) {
            self.kill.enqueue(current);
        }
        self.thread_mut(current).state = ThreadState::Exited;
        debug!("thread {current} exits");

        Ok(self.switch_to(next))
    }

    fn kill(&mut self, id: ThreadId) -> Result<ThreadId, ThreadError> {
        if id == self.current || !self.is_alive(id) {
            return Err(ThreadError::Invalid);
        }
        if !self.kill.contains(id) {
            self.kill.enqueue(id);
        }
        debug!("thread {id} marked for destruction by {}", self.current);
        Ok(id)
    }

    /// `true` if the current thread runs on the stack of the OS thread
    fn on_host_stack(&self) -> bool {
        self.thread(self.current)
            .is_some_and(|thread| thread.stack.is_none())
    }

    /// Takes the entry of the current thread, when it first runs.
    fn start_current(&mut self, by: ThreadId) -> Box<dyn FnMut()> {
        self.resume_current(by);
        let current = self.current;
        self.thread_mut(current)
            .entry
            .take()
            .unwrap_or_else(|| panic!("thread {current} started twice"))
    }

    pub(crate) fn register_wait_queue(&mut self) -> WaitQueueKey {
        let queue = RingQueue::with_capacity(self.config.max_threads);
        let index = match self.free_wait_queues.pop() {
            Some(index) => {
                self.wait_queues[index] = Some(queue);
                index
            }
            None => {
                self.wait_queues.push(Some(queue));
                self.wait_queues.len() - 1
            }
        };
        WaitQueueKey {
            runtime: self.id,
            index,
        }
    }

    /// # Panics
    ///
    /// if threads are parked on the queue
    pub(crate) fn unregister_wait_queue(&mut self, key: WaitQueueKey) {
        let Ok(index) = self.wait_queue_index(key) else {
            return;
        };
        let parked = self.wait_queues[index].as_ref().map_or(0, RingQueue::len);
        assert!(
            parked == 0,
            "destroying a wait queue with {parked} parked threads"
        );
        self.wait_queues[index] = None;
        self.free_wait_queues.push(index);
    }

    fn wait_queue_index(&self, key: WaitQueueKey) -> Result<usize, ThreadError> {
        let registered = key.runtime == self.id
            && matches!(self.wait_queues.get(key.index), Some(Some(_)));
        if registered {
            Ok(key.index)
        } else {
            Err(ThreadError::Invalid)
        }
    }

    fn wait_queue_mut(&mut self, index: usize) -> &mut RingQueue<ThreadId> {
        self.wait_queues[index]
            .as_mut()
            .expect("wait queue index was checked")
    }

    pub(crate) fn parked_count(&self, key: WaitQueueKey) -> usize {
        match self.wait_queue_index(key) {
            Ok(index) => self.wait_queues[index].as_ref().map_or(0, RingQueue::len),
            Err(_) => 0,
        }
    }

    fn prepare_sleep(&mut self, key: WaitQueueKey) -> Result<Switch, ThreadError> {
        let index = self.wait_queue_index(key)?;
        let next = self.ready.pop_front().ok_or(ThreadError::NoneReady)?;
        let current = self.current;

        self.wait_queue_mut(index).enqueue(current);
        self.thread_mut(current).state = ThreadState::Parked(index);

        Ok(self.switch_to(next))
    }

    pub(crate) fn wakeup(&mut self, key: WaitQueueKey, all: bool) -> usize {
        let Ok(index) = self.wait_queue_index(key) else {
            return 0;
        };

        let mut woken = 0;
        while let Some(id) = self.wait_queue_mut(index).pop_front() {
            self.thread_mut(id).state = ThreadState::Ready;
            self.ready.enqueue(id);
            woken += 1;
            if !all {
                break;
            }
        }
        woken
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // stop ticks before any stack goes away
        drop(self.preemption.take());

        let alive = self.threads.iter().filter(|t| t.is_some()).count();
        debug!("tearing down runtime {} with {alive} threads", self.id);
    }
}

/// Entry point of every created thread, called on its fresh stack.
///
/// The thread that switched here still holds a closed interrupt gate on its own
/// stack, so the new thread opens the gate itself.
extern "C" fn thread_main(started_by: usize) -> ! {
    let mut entry = with_runtime(|runtime| runtime.start_current(ThreadId(started_by)));
    interrupts::enable();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry()));

    // The call only consumed the closure. Its box is freed here, with the
    // gate closed, so a preemption tick can not interrupt the allocator.
    let _guard = InterruptDisableGuard::new();
    drop(entry);

    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non string panic payload>");
        error!("thread {} panicked: {message}", id());
        std::process::abort();
    }

    match exit() {
        Ok(never) => match never {},
        Err(e) => {
            info!("last thread {} finished ({e}). Exiting process", id());
            std::process::exit(0);
        }
    }
}

/// Initializes the thread runtime of the calling OS thread.
///
/// The caller becomes thread [ThreadId::INITIAL]. If the config enables
/// preemption, the preemption timer is started as well.
pub fn init(config: RuntimeConfig) -> Result<(), InitError> {
    config.validate()?;

    let _guard = InterruptDisableGuard::new();
    if RUNTIME.with_borrow(Option::is_some) {
        return Err(InitError::AlreadyInitialized);
    }

    let preempt_interval = config.preempt_interval;
    let max_threads = config.max_threads;
    RUNTIME.set(Some(Runtime::new(config)));

    if let Some(interval) = preempt_interval {
        match Preemption::start(interval) {
            Ok(preemption) => with_runtime(|runtime| runtime.preemption = Some(preemption)),
            Err(e) => {
                error!("failed to start preemption: {e}");
                drop(RUNTIME.take());
                return Err(InitError::Preemption(e));
            }
        }
    }

    info!(
        "thread runtime initialized: {max_threads} thread slots, preemption: {preempt_interval:?}"
    );
    Ok(())
}

/// `true` if [init] was called on this OS thread and the runtime was not shut
/// down since.
pub fn is_initialized() -> bool {
    let _guard = InterruptDisableGuard::new();
    RUNTIME
        .try_with(|runtime| matches!(runtime.try_borrow(), Ok(r) if r.is_some()))
        .unwrap_or(false)
}

/// Tears down the runtime of the calling OS thread.
///
/// Must be called from the context adopted by [init], otherwise this fails with
/// [ThreadError::Failed]. Every other thread is destroyed without being
/// resumed. Values living on their stacks are leaked.
pub fn shutdown() -> Result<(), ThreadError> {
    let _guard = InterruptDisableGuard::new();

    let runtime = RUNTIME.with_borrow_mut(|slot| {
        if slot.as_ref().is_some_and(Runtime::on_host_stack) {
            Ok(slot.take())
        } else {
            Err(ThreadError::Failed)
        }
    })?;

    // dropped outside of the borrow, entry closures may use the runtime
    drop(runtime);
    info!("thread runtime shut down");

    Ok(())
}

/// Starts a new thread that runs `entry`.
///
/// The thread is appended to the ready queue and first runs when it is
/// switched to. If `entry` returns the thread exits.
pub fn create<F>(entry: F) -> Result<ThreadId, ThreadError>
where
    F: FnOnce() + 'static,
{
    let _guard = InterruptDisableGuard::new();
    // a FnOnce box would be freed by the call itself, with the gate open
    let mut entry = Some(entry);
    let entry: Box<dyn FnMut()> = Box::new(move || {
        if let Some(entry) = entry.take() {
            entry()
        }
    });

    match with_runtime(|runtime| runtime.create(entry)) {
        Ok(id) => Ok(id),
        Err((e, entry)) => {
            drop(entry);
            Err(e)
        }
    }
}

/// The id of the calling thread
pub fn id() -> ThreadId {
    let _guard = InterruptDisableGuard::new();
    with_runtime(|runtime| runtime.current())
}

/// Suspends the calling thread in favor of `target`.
///
/// Returns the id of the thread that was switched to, once the caller runs
/// again.
///
/// * [Target::Any] runs the front of the ready queue and appends the caller to
///   the back. Fails with [ThreadError::NoneReady] if no other thread is ready.
/// * [Target::Current] suspends and immediately resumes the caller.
/// * [Target::Id] runs the given thread, which must be ready, otherwise this
///   fails with [ThreadError::Invalid]. The caller takes its place in the
///   ready queue.
pub fn yield_to(target: impl Into<Target>) -> Result<ThreadId, ThreadError> {
    let target = target.into();
    let _guard = InterruptDisableGuard::new();

    let (reaped, switch) =
        with_runtime(|runtime| (runtime.drain_kill_queue(), runtime.prepare_yield(target)));
    drop(reaped);

    Ok(switch?.perform())
}

/// Yields to the front of the ready queue. See [yield_to]
pub fn yield_now() -> Result<ThreadId, ThreadError> {
    yield_to(Target::Any)
}

/// Terminates the calling thread.
///
/// Does not return, unless no other thread is ready. In that case the caller
/// stays alive and [ThreadError::NoneReady] is returned.
pub fn exit() -> Result<Infallible, ThreadError> {
    let _guard = InterruptDisableGuard::new();

    let (reaped, switch) =
        with_runtime(|runtime| (runtime.drain_kill_queue(), runtime.prepare_exit()));
    drop(reaped);

    let switch = switch?;
    let from = switch.from;
    switch.perform();

    panic!("exited thread {from} was resumed");
}

/// Marks `id` for destruction.
///
/// The thread is destroyed at the next suspension point of any other thread.
/// Until then it keeps running when scheduled. Fails with
/// [ThreadError::Invalid] for the calling thread and for ids that do not name
/// a live thread.
pub fn kill(id: ThreadId) -> Result<ThreadId, ThreadError> {
    let _guard = InterruptDisableGuard::new();
    with_runtime(|runtime| runtime.kill(id))
}

/// `true` if `id` names a live thread
pub fn is_alive(id: ThreadId) -> bool {
    let _guard = InterruptDisableGuard::new();
    with_runtime(|runtime| runtime.is_alive(id))
}

/// The ready queue from front to back
pub fn ready_threads() -> Vec<ThreadId> {
    let _guard = InterruptDisableGuard::new();
    with_runtime(|runtime| runtime.ready.iter().collect())
}

/// Parks the calling thread on the wait queue `key` and runs the front of the
/// ready queue.
pub(crate) fn sleep_on(key: WaitQueueKey) -> Result<ThreadId, ThreadError> {
    let _guard = InterruptDisableGuard::new();

    let (reaped, switch) =
        with_runtime(|runtime| (runtime.drain_kill_queue(), runtime.prepare_sleep(key)));
    drop(reaped);

    Ok(switch?.perform())
}
