/*
 * Preemptive Priority Scheduler
 *
 * This module implements the scheduler core of the LARK kernel: a priority
 * ordered ready queue with preemption on timer ticks and on priority change.
 *
 * SCHEDULING ALGORITHM:
 * ====================
 *
 * The ready queue is an intrusive list kept sorted by effective priority,
 * highest first. The front of the queue is always the next thread to run;
 * when the queue is empty the built-in idle thread runs instead.
 *
 * Preemption has two triggers:
 * 1. TIMER TICKS: every tick charges the running thread's time slice; after
 *    TIME_SLICE ticks the interrupt return path forces a yield, which gives
 *    round-robin rotation among equal-priority threads.
 * 2. PRIORITY CHANGES: whenever an operation can make a higher-priority
 *    thread ready (unblock, spawn, semaphore up, priority change), the
 *    preemption check compares the running thread against the queue front
 *    and yields if it lost. From interrupt context the yield is deferred to
 *    the interrupt return path instead.
 *
 * Insertion into the ready queue is stable: a newly readied thread lands
 * after already-queued threads of equal priority, so equals share the CPU
 * fairly instead of ping-ponging.
 *
 * CRITICAL SECTIONS:
 * =================
 *
 * All scheduler state lives in one structure behind a spin mutex that is
 * only ever taken with interrupts disabled (single CPU - the interrupt gate
 * is the real exclusion mechanism, the mutex packages the unsafe interior).
 * The mutex is never held across a context switch: `schedule` extracts the
 * two frame pointers, drops the guard, then calls the machine.
 *
 * THREAD LIFECYCLE:
 * ================
 *
 *   spawn -> Blocked -> unblock -> Ready -> schedule -> Running
 *                ^                   ^                     |
 *                |                   +------- yield -------+
 *                +------- block (semaphore, sleep, ...) ---+
 *                                    exit -> Dying -> page freed on a later
 *                                                     scheduler pass
 *
 * A Dying thread cannot free its own page (it is standing on it), so the
 * page is queued and released at the start of the next `schedule` call,
 * which runs on another thread's stack. The bootstrap thread - synthesized
 * by `init` from the boot context - is never destroyed.
 */

pub mod sleep;
pub mod thread;
pub mod types;

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::collections::List;
use crate::interrupt;
use crate::machine::{IntrLevel, machine};
use crate::sync::{Lock, Semaphore};

use thread::{SwitchFrame, Thread, ThreadFunc, ThreadStatus};
use types::{Priority, SpawnError, TIME_SLICE, Tid};

/// All global scheduler state. Initialized once by `init` before interrupts
/// are enabled; every later access happens with interrupts off.
pub(crate) struct SchedCtx {
    /// Threads that are `Ready`, sorted by effective priority (highest
    /// first, stable).
    pub(crate) ready: List<Thread>,
    /// Threads sleeping until a wake tick, sorted by ascending wake tick.
    pub(crate) sleep: List<Thread>,
    /// Dying threads whose pages are freed on the next `schedule` entry.
    pub(crate) destruction: List<Thread>,

    /// The running thread.
    pub(crate) current: *mut Thread,
    /// The idle thread; registered by the idle thread itself at startup.
    pub(crate) idle: *mut Thread,
    /// The bootstrap thread; never destroyed.
    pub(crate) bootstrap: *mut Thread,

    /// Ticks the running thread has held the CPU in its current slice.
    pub(crate) slice_ticks: u32,

    /// Timer ticks spent in the idle thread.
    pub(crate) idle_ticks: u64,
    /// Timer ticks spent in kernel threads.
    pub(crate) kernel_ticks: u64,
    /// Context switches performed.
    pub(crate) context_switches: u64,
}

impl SchedCtx {
    const fn new() -> Self {
        Self {
            ready: List::new(),
            sleep: List::new(),
            destruction: List::new(),
            current: ptr::null_mut(),
            idle: ptr::null_mut(),
            bootstrap: ptr::null_mut(),
            slice_ticks: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            context_switches: 0,
        }
    }
}

// Raw thread pointers are only dereferenced under the interrupt gate.
unsafe impl Send for SchedCtx {}

pub(crate) static SCHED: Mutex<SchedCtx> = Mutex::new(SchedCtx::new());

/// When set, the multi-level feedback queue scheduler manages priorities
/// itself and `set_priority` is a no-op. The MLFQ policy is not implemented;
/// the flag exists so the embedder's command line can be honored.
static MLFQS: AtomicBool = AtomicBool::new(false);

/// Lock serializing thread-id allocation.
static TID_LOCK: Lock = Lock::new();

struct TidCell(UnsafeCell<i32>);
// Guarded by TID_LOCK.
unsafe impl Sync for TidCell {}

static NEXT_TID: TidCell = TidCell(UnsafeCell::new(1));

/// Run `f` with the scheduler context locked. Interrupts must already be
/// off; the closure must not re-enter the scheduler context.
pub(crate) fn with_sched<R>(f: impl FnOnce(&mut SchedCtx) -> R) -> R {
    assert_eq!(
        interrupt::level(),
        IntrLevel::Off,
        "scheduler state touched with interrupts enabled"
    );
    let mut ctx = SCHED.lock();
    f(&mut ctx)
}

/// Initialize the thread system and synthesize the bootstrap thread from
/// the running context. Must be called with interrupts off, after
/// `machine::install`, before anything else in this crate.
pub fn init() {
    assert_eq!(interrupt::level(), IntrLevel::Off);

    let page = machine()
        .alloc_thread_page()
        .expect("out of pages while booting the thread system");
    let bootstrap = unsafe { Thread::init_at(page, "main", Priority::DEFAULT) };

    unsafe {
        (*bootstrap.as_ptr()).status = ThreadStatus::Running;
    }
    with_sched(|ctx| {
        ctx.current = bootstrap.as_ptr();
        ctx.bootstrap = bootstrap.as_ptr();
    });

    // The TID lock is usable from here on; the bootstrap thread is current.
    let tid = allocate_tid();
    unsafe {
        (*bootstrap.as_ptr()).tid = tid;
    }

    log::info!("thread system initialized, bootstrap {tid}");
}

/// Start preemptive scheduling: spawn the idle thread, enable interrupts,
/// and wait until idle has registered itself.
pub fn start() {
    let idle_started = Semaphore::new(0);
    spawn(
        "idle",
        Priority::MIN,
        idle_main,
        &idle_started as *const Semaphore as *mut (),
    )
    .expect("failed to spawn the idle thread");

    interrupt::restore(IntrLevel::On);

    idle_started.down();
    log::info!("preemptive scheduling active");
}

/// Create a kernel thread running `func(aux)` at `priority` and make it
/// ready. Preempts the caller if the new thread has higher priority.
pub fn spawn(name: &str, priority: Priority, func: ThreadFunc, aux: *mut ()) -> Result<Tid, SpawnError> {
    let page = machine().alloc_thread_page().ok_or(SpawnError::OutOfPages)?;
    let new = unsafe { Thread::init_at(page, name, priority) };

    let tid = allocate_tid();
    unsafe {
        let t = new.as_ptr();
        (*t).tid = tid;
        (*t).seed_context(func, aux);
    }

    log::info!("created thread '{name}' ({tid}) at priority {priority}");

    unblock(new);
    preempt_if_higher();
    Ok(tid)
}

/// The running thread. Verifies the stack canary on every access.
pub(crate) fn current() -> NonNull<Thread> {
    let _gate = interrupt::IntrGuard::new();
    let raw = with_sched(|ctx| ctx.current);
    let thread = NonNull::new(raw).expect("no running thread; scheduler::init not called");
    unsafe {
        let t = thread.as_ref();
        if !t.canary_intact() {
            panic!("stack overflow detected in thread {}", t.tid);
        }
        assert_eq!(t.status, ThreadStatus::Running);
    }
    thread
}

pub fn current_tid() -> Tid {
    unsafe { current().as_ref().tid }
}

pub fn current_name() -> heapless::String<{ types::THREAD_NAME_MAX }> {
    unsafe { current().as_ref().name.clone() }
}

/// The running thread's effective priority (donations included).
pub fn current_priority() -> Priority {
    unsafe { current().as_ref().priority }
}

/// Set the running thread's base priority and recompute its effective
/// priority. Donated priorities win over a voluntary lowering; if the
/// thread no longer has the highest priority it yields before returning.
pub fn set_priority(new: Priority) {
    assert!(new.is_valid(), "priority {new} out of range");
    if mlfqs() {
        // The MLFQ policy owns thread priorities.
        return;
    }

    {
        let _gate = interrupt::IntrGuard::new();
        let curr = current();
        unsafe {
            let t = curr.as_ptr();
            (*t).init_priority = new;
            (*t).refresh_priority();
        }
    }
    preempt_if_higher();
}

/// Transition the running thread to `Blocked` and schedule. Interrupts must
/// be off; the thread will not run again until `unblock` is called on it.
pub(crate) fn block() {
    assert!(!interrupt::in_interrupt(), "cannot block in interrupt context");
    assert_eq!(interrupt::level(), IntrLevel::Off);

    with_sched(|ctx| unsafe {
        (*ctx.current).status = ThreadStatus::Blocked;
    });
    schedule();
}

/// Move a `Blocked` thread to the ready queue. Safe from interrupt context.
/// Does not preempt; callers that can wake a higher-priority thread follow
/// up with `preempt_if_higher`.
pub(crate) fn unblock(thread: NonNull<Thread>) {
    let _gate = interrupt::IntrGuard::new();
    unsafe {
        let t = thread.as_ptr();
        assert!((*t).canary_intact());
        assert_eq!((*t).status, ThreadStatus::Blocked, "unblock of a non-blocked thread");
    }
    with_sched(|ctx| unsafe {
        ctx.ready
            .insert_ordered(thread::elem_link(thread), thread::higher_priority);
        (*thread.as_ptr()).status = ThreadStatus::Ready;
    });
}

/// Voluntarily give up the CPU: re-insert the caller into the ready queue
/// (priority ordered, after equals) and schedule.
pub fn yield_now() {
    assert!(!interrupt::in_interrupt(), "cannot yield in interrupt context");

    let old = interrupt::disable();
    with_sched(|ctx| unsafe {
        let curr = ctx.current;
        if curr != ctx.idle {
            ctx.ready.insert_ordered(
                thread::elem_link(NonNull::new_unchecked(curr)),
                thread::higher_priority,
            );
        }
        (*curr).status = ThreadStatus::Ready;
    });
    schedule();
    interrupt::restore(old);
}

/// Terminate the running thread. Its page is freed on a later scheduler
/// pass, on another thread's stack.
pub fn exit() -> ! {
    assert!(!interrupt::in_interrupt(), "cannot exit from interrupt context");

    log::info!("thread {} exiting", current_tid());

    interrupt::disable();
    with_sched(|ctx| unsafe {
        (*ctx.current).status = ThreadStatus::Dying;
    });
    schedule();
    unreachable!("schedule returned to a dying thread");
}

/// If the ready-queue front now outranks the running thread, yield to it.
/// In interrupt context the yield is deferred to the interrupt return path.
/// The idle thread is never preempted this way; anything outranks it and it
/// blocks on its own.
pub(crate) fn preempt_if_higher() {
    let old = interrupt::disable();

    let should_yield = with_sched(|ctx| unsafe {
        if ctx.current.is_null() || ctx.current == ctx.idle {
            return false;
        }
        match ctx.ready.front() {
            Some(head) => head.as_ref().priority() > (*ctx.current).priority,
            None => false,
        }
    });

    if should_yield {
        if interrupt::in_interrupt() {
            machine().yield_on_interrupt_return();
        } else {
            yield_now();
        }
    }

    interrupt::restore(old);
}

/// Timer tick bookkeeping, called from the timer interrupt: charge the
/// running thread's category and enforce the time slice.
pub(crate) fn tick() {
    let _gate = interrupt::IntrGuard::new();
    with_sched(|ctx| {
        if !ctx.idle.is_null() && ctx.current == ctx.idle {
            ctx.idle_ticks += 1;
        } else {
            ctx.kernel_ticks += 1;
        }

        ctx.slice_ticks += 1;
        if ctx.slice_ticks >= TIME_SLICE {
            machine().yield_on_interrupt_return();
        }
    });
}

/// Pick the next thread and switch to it. Preconditions: interrupts off,
/// the caller's status is no longer `Running`. Frees the pages of threads
/// that died on earlier passes.
fn schedule() {
    assert_eq!(interrupt::level(), IntrLevel::Off);

    let mut frames: Option<(*mut SwitchFrame, *const SwitchFrame)> = None;

    with_sched(|ctx| unsafe {
        while let Some(victim) = ctx.destruction.pop_front() {
            machine().free_thread_page(victim.cast());
        }

        let prev = ctx.current;
        assert_ne!((*prev).status, ThreadStatus::Running);

        let next = next_to_run(ctx);
        (*next.as_ptr()).status = ThreadStatus::Running;
        ctx.current = next.as_ptr();
        ctx.slice_ticks = 0;

        if prev != next.as_ptr() {
            ctx.context_switches += 1;

            // A dying thread's page is still its stack; queue the free for
            // the next pass, which runs on another stack.
            if (*prev).status == ThreadStatus::Dying && prev != ctx.bootstrap {
                ctx.destruction
                    .push_back(thread::elem_link(NonNull::new_unchecked(prev)));
            }

            frames = Some((&raw mut (*prev).frame, &raw const (*next.as_ptr()).frame));
        }
    });

    // The context lock must not be held across the switch: the next thread
    // may take it immediately.
    if let Some((prev_frame, next_frame)) = frames {
        unsafe {
            machine().context_switch(prev_frame, next_frame);
        }
    }
}

/// Front of the ready queue, or the idle thread if the queue is empty.
fn next_to_run(ctx: &mut SchedCtx) -> NonNull<Thread> {
    unsafe { ctx.ready.pop_front() }
        .or_else(|| NonNull::new(ctx.idle))
        .expect("ready queue empty before the idle thread exists")
}

fn allocate_tid() -> Tid {
    TID_LOCK.acquire();
    let tid = unsafe {
        let next = NEXT_TID.0.get();
        let tid = *next;
        *next += 1;
        Tid(tid)
    };
    TID_LOCK.release();
    tid
}

/// Idle thread body: register with the scheduler, signal the boot thread,
/// then alternate between blocking and halting. The idle thread never sits
/// on the ready queue; `next_to_run` falls back to it directly.
fn idle_main(aux: *mut ()) {
    let started = unsafe { &*(aux as *const Semaphore) };

    {
        let _gate = interrupt::IntrGuard::new();
        let me = current();
        with_sched(|ctx| ctx.idle = me.as_ptr());
    }
    log::info!("idle thread registered");

    started.up();

    loop {
        interrupt::disable();
        block();

        // Re-dispatched with interrupts off; enable and wait for the next
        // interrupt in one atomic step so no wakeup slips in between.
        machine().halt_until_interrupt();
    }
}

/// Select the multi-level feedback queue scheduler. Accepted before
/// `start`; the policy itself is not implemented.
pub fn set_mlfqs(enabled: bool) {
    MLFQS.store(enabled, Ordering::Relaxed);
    if enabled {
        log::warn!("mlfqs requested; the MLFQ policy is a stub");
    }
}

pub fn mlfqs() -> bool {
    MLFQS.load(Ordering::Relaxed)
}

/// Scheduler counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub context_switches: u64,
}

pub fn stats() -> SchedStats {
    let _gate = interrupt::IntrGuard::new();
    with_sched(|ctx| SchedStats {
        idle_ticks: ctx.idle_ticks,
        kernel_ticks: ctx.kernel_ticks,
        context_switches: ctx.context_switches,
    })
}

pub fn print_stats() {
    let s = stats();
    log::info!(
        "Thread: {} idle ticks, {} kernel ticks, {} context switches",
        s.idle_ticks,
        s.kernel_ticks,
        s.context_switches
    );
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *SCHED.lock() = SchedCtx::new();
    unsafe {
        *NEXT_TID.0.get() = 1;
    }
    MLFQS.store(false, Ordering::Relaxed);
}
