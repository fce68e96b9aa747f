/*
 * x86_64 Interrupt Flag Control
 *
 * Thin wrappers over the interrupt flag, shaped to the `Machine` gate
 * contract: disable returns the prior level, restore takes one back.
 */

use x86_64::instructions::interrupts;

use crate::machine::IntrLevel;

/// Disable interrupts and return the level that was in force.
pub fn intr_disable() -> IntrLevel {
    let prior = intr_level();
    interrupts::disable();
    prior
}

/// Restore a previously saved interrupt level.
pub fn intr_restore(level: IntrLevel) {
    match level {
        IntrLevel::On => interrupts::enable(),
        IntrLevel::Off => interrupts::disable(),
    }
}

/// Current interrupt level.
pub fn intr_level() -> IntrLevel {
    if interrupts::are_enabled() {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

/// Enable interrupts and halt until the next one arrives. The two steps are
/// atomic (`sti` shadows the following instruction), so a wakeup between
/// them cannot be lost. Used by the idle thread.
pub fn halt_until_interrupt() {
    interrupts::enable_and_hlt();
}
