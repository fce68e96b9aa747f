/*
 * x86_64 Support
 *
 * The machine-level pieces of the scheduler contract for x86_64: interrupt
 * flag control, the idle halt, the calibrated delay loop, and the context
 * switch. An embedding kernel forwards its `Machine` methods here and adds
 * what the library cannot know (its page allocator, its interrupt-return
 * yield flag).
 */

pub mod interrupts;
pub mod switch;

use core::sync::atomic::{Ordering, compiler_fence};

pub use interrupts::{halt_until_interrupt, intr_disable, intr_level, intr_restore};
pub use switch::switch_frames;

/// Spin for `loops` iterations. Marked `inline(never)` so calibration of
/// loops-per-tick measures the same code that later runs.
#[inline(never)]
pub fn busy_wait(loops: u64) {
    let mut remaining = loops;
    while remaining > 0 {
        compiler_fence(Ordering::SeqCst);
        remaining -= 1;
    }
}
