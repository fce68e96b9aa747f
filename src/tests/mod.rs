/*
 * Test Suite for the Scheduler Core
 *
 * Host-side tests driving the real scheduler code against a simulated
 * machine. The simulation keeps the interrupt flag in an atomic, records
 * yield-on-interrupt-return requests, lets a test claim to be in interrupt
 * context, allocates thread pages from the host allocator, and performs
 * context switches as recorded no-ops.
 *
 * A no-op switch means `block`/`yield_now` return immediately while the
 * scheduler context tracks which thread *would* be running; tests assert on
 * that state (current thread, queue contents and order, statuses,
 * priorities) rather than on actual interleaved execution. Blocking paths
 * that would loop (a contended `down`) are exercised through the same
 * crate-internal building blocks the real paths use: `enqueue_waiter`,
 * `register_donor`, the sleep-queue insert.
 *
 * Scheduler globals are process-wide, so tests serialize on a lock and
 * reset the globals before each body.
 */

mod semaphore;

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::vec::Vec;

use crate::interrupt::IntrGuard;
use crate::machine::{self, IntrLevel, Machine};
use crate::scheduler::thread::{SwitchFrame, Thread, ThreadStatus};
use crate::scheduler::types::{Priority, THREAD_PAGE_SIZE, Tick, Tid};
use crate::scheduler::{self, sleep, with_sched};
use crate::sync::Semaphore;
use crate::timer;

/// Simulated machine. One static instance shared by every test; `reset`
/// puts it back in the boot state (interrupts off, thread context).
struct SimMachine {
    intr_on: AtomicBool,
    in_isr: AtomicBool,
    yield_requested: AtomicBool,
    switches: AtomicU64,
    busy_loops: AtomicU64,
    frees: AtomicU64,
}

impl SimMachine {
    const fn new() -> Self {
        Self {
            intr_on: AtomicBool::new(false),
            in_isr: AtomicBool::new(false),
            yield_requested: AtomicBool::new(false),
            switches: AtomicU64::new(0),
            busy_loops: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.intr_on.store(false, Ordering::SeqCst);
        self.in_isr.store(false, Ordering::SeqCst);
        self.yield_requested.store(false, Ordering::SeqCst);
        self.switches.store(0, Ordering::SeqCst);
        self.busy_loops.store(0, Ordering::SeqCst);
        self.frees.store(0, Ordering::SeqCst);
    }
}

impl Machine for SimMachine {
    fn intr_disable(&self) -> IntrLevel {
        if self.intr_on.swap(false, Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn intr_restore(&self, level: IntrLevel) {
        self.intr_on.store(level == IntrLevel::On, Ordering::SeqCst);
    }

    fn intr_level(&self) -> IntrLevel {
        if self.intr_on.load(Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn in_interrupt(&self) -> bool {
        self.in_isr.load(Ordering::SeqCst)
    }

    fn yield_on_interrupt_return(&self) {
        self.yield_requested.store(true, Ordering::SeqCst);
    }

    fn alloc_thread_page(&self) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(THREAD_PAGE_SIZE, THREAD_PAGE_SIZE).unwrap();
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn free_thread_page(&self, page: NonNull<u8>) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        let layout = Layout::from_size_align(THREAD_PAGE_SIZE, THREAD_PAGE_SIZE).unwrap();
        unsafe { dealloc(page.as_ptr(), layout) };
    }

    unsafe fn context_switch(&self, _prev: *mut SwitchFrame, _next: *const SwitchFrame) {
        // No-op: control stays with the caller, the scheduler context
        // tracks who would be running.
        self.switches.fetch_add(1, Ordering::SeqCst);
    }

    fn halt_until_interrupt(&self) {
        panic!("simulated machine asked to halt; no test should dispatch idle");
    }

    fn busy_wait(&self, loops: u64) {
        self.busy_loops.fetch_add(loops, Ordering::SeqCst);
    }

    fn loops_per_tick(&self) -> u64 {
        1000
    }
}

static SIM: SimMachine = SimMachine::new();
static TEST_LOCK: StdMutex<()> = StdMutex::new(());
static HARNESS_TID: AtomicI32 = AtomicI32::new(1000);

/// Run a test body against a freshly initialized scheduler: machine
/// installed, globals reset, bootstrap thread current, interrupts off.
pub(crate) fn run(body: impl FnOnce()) {
    let _serial = TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    machine::install(&SIM);
    SIM.reset();
    scheduler::reset_for_tests();
    timer::reset_for_tests();
    scheduler::init();

    body();
}

pub(crate) fn enable_interrupts() {
    SIM.intr_on.store(true, Ordering::SeqCst);
}

/// Pretend to be inside an interrupt handler (interrupts off, ISR flag set).
pub(crate) fn enter_isr() {
    SIM.intr_on.store(false, Ordering::SeqCst);
    SIM.in_isr.store(true, Ordering::SeqCst);
}

pub(crate) fn exit_isr() {
    SIM.in_isr.store(false, Ordering::SeqCst);
}

pub(crate) fn yield_was_requested() -> bool {
    SIM.yield_requested.load(Ordering::SeqCst)
}

pub(crate) fn clear_yield_request() {
    SIM.yield_requested.store(false, Ordering::SeqCst);
}

pub(crate) fn switch_count() -> u64 {
    SIM.switches.load(Ordering::SeqCst)
}

pub(crate) fn busy_loops() -> u64 {
    SIM.busy_loops.load(Ordering::SeqCst)
}

pub(crate) fn freed_pages() -> u64 {
    SIM.frees.load(Ordering::SeqCst)
}

/// The bootstrap thread (current right after `run` sets up).
pub(crate) fn boot_thread() -> NonNull<Thread> {
    NonNull::new(current_ptr()).unwrap()
}

/// Remove a thread from the ready queue, e.g. before handing it the CPU
/// with `set_current`.
pub(crate) fn take_ready(thread: NonNull<Thread>) {
    let _gate = IntrGuard::new();
    with_sched(|ctx| unsafe {
        ctx.ready.remove(crate::scheduler::thread::elem_link(thread));
    });
}

/// Queue a thread's page for deferred destruction, as `schedule` does for
/// a dying thread.
pub(crate) fn queue_destruction(thread: NonNull<Thread>) {
    let _gate = IntrGuard::new();
    unsafe {
        (*thread.as_ptr()).status = ThreadStatus::Dying;
    }
    with_sched(|ctx| unsafe {
        ctx.destruction
            .push_back(crate::scheduler::thread::elem_link(thread));
    });
}

/// Build a thread control block that is not yet known to the scheduler
/// (status `Blocked`, like a freshly spawned thread before unblock).
pub(crate) fn make_thread(name: &str, priority: Priority) -> NonNull<Thread> {
    let page = machine::machine()
        .alloc_thread_page()
        .expect("host allocator failed");
    let thread = unsafe { Thread::init_at(page, name, priority) };
    unsafe {
        (*thread.as_ptr()).tid = Tid(HARNESS_TID.fetch_add(1, Ordering::SeqCst));
    }
    thread
}

/// Hand the CPU to `thread` directly, as if the scheduler had dispatched it.
pub(crate) fn set_current(thread: NonNull<Thread>) {
    let _gate = IntrGuard::new();
    unsafe {
        (*thread.as_ptr()).status = ThreadStatus::Running;
    }
    with_sched(|ctx| ctx.current = thread.as_ptr());
}

pub(crate) fn current_ptr() -> *mut Thread {
    let _gate = IntrGuard::new();
    with_sched(|ctx| ctx.current)
}

pub(crate) fn ready_tids() -> Vec<Tid> {
    let _gate = IntrGuard::new();
    with_sched(|ctx| {
        let iter = unsafe { ctx.ready.iter() };
        iter.map(|t| unsafe { t.as_ref().tid() }).collect()
    })
}

pub(crate) fn sleep_tids() -> Vec<Tid> {
    let _gate = IntrGuard::new();
    with_sched(|ctx| {
        let iter = unsafe { ctx.sleep.iter() };
        iter.map(|t| unsafe { t.as_ref().tid() }).collect()
    })
}

pub(crate) fn tid_of(thread: NonNull<Thread>) -> Tid {
    unsafe { thread.as_ref().tid() }
}

pub(crate) fn status_of(thread: NonNull<Thread>) -> ThreadStatus {
    let _gate = IntrGuard::new();
    unsafe { thread.as_ref().status() }
}

pub(crate) fn priority_of(thread: NonNull<Thread>) -> Priority {
    let _gate = IntrGuard::new();
    unsafe { thread.as_ref().priority() }
}

/// Park `thread` on a semaphore's waiter list exactly as a contended `down`
/// would before suspending.
pub(crate) fn park_on_sema(sema: &Semaphore, thread: NonNull<Thread>) {
    let _gate = IntrGuard::new();
    unsafe {
        sema.enqueue_waiter(thread);
        (*thread.as_ptr()).status = ThreadStatus::Blocked;
    }
}

/// Park `thread` on the sleep queue exactly as `sleep_until` would.
pub(crate) fn park_sleeper(thread: NonNull<Thread>, deadline: Tick) {
    let _gate = IntrGuard::new();
    unsafe {
        (*thread.as_ptr()).wakeup_tick = deadline;
        (*thread.as_ptr()).status = ThreadStatus::Blocked;
    }
    with_sched(|ctx| unsafe {
        ctx.sleep
            .insert_ordered(crate::scheduler::thread::elem_link(thread), sleep::wakes_first);
    });
}
