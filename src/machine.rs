/*
 * Machine Collaborator Contract
 *
 * Everything machine-specific the scheduler core consumes, bundled into one
 * trait the embedding kernel implements and installs at boot. The core never
 * touches hardware directly; it asks the machine to flip the interrupt flag,
 * switch register contexts, hand out thread pages and halt the CPU.
 *
 * Splitting policy from mechanism this way keeps the scheduler portable: on
 * real hardware the embedder composes its implementation from the
 * `arch::x86_64` building blocks, while the test suite installs a simulated
 * machine and drives the same scheduler code on the host.
 */

use core::ptr::NonNull;

use spin::Once;

use crate::scheduler::thread::SwitchFrame;

/// Interrupt state, as returned by `intr_disable` and consumed by
/// `intr_restore`. Disables nest by saving and restoring the prior level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    /// Interrupts enabled.
    On,
    /// Interrupts disabled.
    Off,
}

/// The external collaborators of the scheduler core.
///
/// Implementations must be interrupt-safe: every method except
/// `context_switch` and `halt_until_interrupt` may be called from an
/// interrupt handler.
pub trait Machine: Sync {
    /// Disable interrupts and return the prior level.
    fn intr_disable(&self) -> IntrLevel;

    /// Restore a previously saved interrupt level.
    fn intr_restore(&self, level: IntrLevel);

    /// Current interrupt level.
    fn intr_level(&self) -> IntrLevel;

    /// True while executing an (external) interrupt handler.
    fn in_interrupt(&self) -> bool;

    /// Request a yield once the current interrupt handler returns. Only
    /// meaningful while `in_interrupt()`; the embedder's interrupt return
    /// path performs the yield.
    fn yield_on_interrupt_return(&self);

    /// Allocate one zeroed page for a thread control block plus stack.
    /// Returns `None` when the allocator is exhausted.
    fn alloc_thread_page(&self) -> Option<NonNull<u8>>;

    /// Return a page obtained from `alloc_thread_page`.
    ///
    /// # Safety
    /// `page` came from `alloc_thread_page` and nothing references it.
    unsafe fn free_thread_page(&self, page: NonNull<u8>);

    /// Save the running register context into `prev` and resume `next`.
    /// Entered with interrupts off; they remain off until the resumed
    /// thread re-enables them.
    ///
    /// # Safety
    /// Both frames belong to live thread control blocks and `next` holds a
    /// resumable context (seeded at spawn or saved by an earlier switch).
    unsafe fn context_switch(&self, prev: *mut SwitchFrame, next: *const SwitchFrame);

    /// Atomically enable interrupts and halt until the next one arrives.
    /// Used only by the idle thread.
    fn halt_until_interrupt(&self);

    /// Spin for `loops` iterations of the calibrated delay loop.
    fn busy_wait(&self, loops: u64);

    /// Iterations of the delay loop per timer tick, as calibrated by the
    /// embedder at boot.
    fn loops_per_tick(&self) -> u64;
}

static MACHINE: Once<&'static dyn Machine> = Once::new();

/// Install the machine implementation. Must happen before `scheduler::init`;
/// later calls are ignored.
pub fn install(machine: &'static dyn Machine) {
    MACHINE.call_once(|| machine);
}

/// The installed machine.
///
/// Panics if called before `install` - scheduler state cannot be protected
/// without an interrupt gate.
pub(crate) fn machine() -> &'static dyn Machine {
    *MACHINE
        .get()
        .expect("no Machine installed; call machine::install during boot")
}
