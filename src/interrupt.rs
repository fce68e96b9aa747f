/*
 * Interrupt-State Gate
 *
 * The one synchronization primitive the core relies on (single CPU): disable
 * interrupts around a critical section, restore the prior state afterwards.
 * Disables nest naturally because each caller restores the level it saw.
 *
 * Both edges of the gate carry a compiler fence so the optimizer cannot
 * float loads or stores of scheduler state out of the critical section.
 */

use core::sync::atomic::{Ordering, compiler_fence};

use crate::machine::{IntrLevel, machine};

/// Disable interrupts, returning the prior level.
pub fn disable() -> IntrLevel {
    let prior = machine().intr_disable();
    compiler_fence(Ordering::SeqCst);
    prior
}

/// Restore a level previously returned by `disable`.
pub fn restore(level: IntrLevel) {
    compiler_fence(Ordering::SeqCst);
    machine().intr_restore(level);
}

/// Current interrupt level.
pub fn level() -> IntrLevel {
    machine().intr_level()
}

pub fn enabled() -> bool {
    level() == IntrLevel::On
}

/// True while running inside an interrupt handler.
pub fn in_interrupt() -> bool {
    machine().in_interrupt()
}

/// RAII gate for straight-line critical sections: interrupts are disabled
/// on construction and the prior level restored on drop. Sections that
/// suspend in the middle (block on a semaphore) use explicit
/// `disable`/`restore` instead, since the guard would be restored on the
/// wrong side of the context switch.
pub struct IntrGuard {
    prior: IntrLevel,
}

impl IntrGuard {
    pub fn new() -> Self {
        Self { prior: disable() }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        restore(self.prior);
    }
}
