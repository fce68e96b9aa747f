/*
 * System Timer
 *
 * Tick counting and tick-based sleeping. The embedder routes its periodic
 * timer interrupt to `interrupt_tick`, which advances the monotonic tick
 * counter, charges the running thread's time slice and drains the sleep
 * queue. Everything else in this module is derived from that counter.
 *
 * The counter is 64 bits; on 32-bit hosts a torn read would be possible, so
 * reads go through the interrupt gate like every other piece of scheduler
 * state.
 *
 * Sub-tick delays cannot use the sleep queue (the resolution is one tick),
 * so the real-time helpers fall back to the machine's calibrated busy-wait
 * loop when a duration rounds down to zero ticks.
 */

use spin::Mutex;

use crate::interrupt::{self, IntrGuard};
use crate::machine::machine;
use crate::scheduler::{self, sleep};
use crate::scheduler::types::Tick;

/// Timer interrupts per second. The 8254-style interval timer cannot be
/// programmed meaningfully outside this range.
pub const TIMER_FREQ: u64 = 100;

const _: () = assert!(TIMER_FREQ >= 19, "interval timer requires TIMER_FREQ >= 19");
const _: () = assert!(TIMER_FREQ <= 1000, "TIMER_FREQ <= 1000 recommended");

/// Timer ticks since boot. Written only by `interrupt_tick`.
static TICKS: Mutex<Tick> = Mutex::new(0);

/// Ticks since boot.
pub fn ticks() -> Tick {
    let _gate = IntrGuard::new();
    *TICKS.lock()
}

/// Ticks elapsed since `then`, which must be a value previously returned by
/// `ticks`.
pub fn elapsed(then: Tick) -> u64 {
    ticks() - then
}

/// Timer interrupt handler body. The embedder's ISR must call this exactly
/// once per timer interrupt.
pub fn interrupt_tick() {
    debug_assert!(interrupt::in_interrupt());

    let now = {
        let mut ticks = TICKS.lock();
        *ticks += 1;
        *ticks
    };

    scheduler::tick();
    sleep::wakeup(now);
}

/// Suspend execution for approximately `ticks` timer ticks. A non-positive
/// duration returns immediately without scheduling.
pub fn sleep(ticks: i64) {
    if ticks <= 0 {
        return;
    }
    assert!(interrupt::enabled(), "timer::sleep with interrupts disabled");

    let start = self::ticks();
    sleep::sleep_until(start + ticks as u64);
}

/// Suspend execution for approximately `ms` milliseconds.
pub fn msleep(ms: i64) {
    real_time_sleep(ms, 1000);
}

/// Suspend execution for approximately `us` microseconds.
pub fn usleep(us: i64) {
    real_time_sleep(us, 1000 * 1000);
}

/// Suspend execution for approximately `ns` nanoseconds.
pub fn nsleep(ns: i64) {
    real_time_sleep(ns, 1000 * 1000 * 1000);
}

pub fn print_stats() {
    log::info!("Timer: {} ticks", ticks());
}

/// Sleep for approximately `num/denom` seconds.
fn real_time_sleep(num: i64, denom: i32) {
    // Convert to timer ticks, rounding down:
    //
    //   (num / denom) s
    //   ------------------------ = num * TIMER_FREQ / denom ticks.
    //   1 s / TIMER_FREQ ticks
    let ticks = num * TIMER_FREQ as i64 / denom as i64;

    assert!(interrupt::enabled());
    if ticks > 0 {
        // At least one full tick: yield the CPU to other threads.
        sleep(ticks);
    } else {
        // Sub-tick: busy-wait for finer timing. Scale num and denom by 1000
        // to keep the intermediate product from overflowing.
        assert!(denom % 1000 == 0);
        let loops =
            machine().loops_per_tick() as i64 * num / 1000 * TIMER_FREQ as i64 / (denom as i64 / 1000);
        machine().busy_wait(loops as u64);
    }
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *TICKS.lock() = 0;
}

#[cfg(test)]
pub(crate) fn advance_for_tests(to: Tick) {
    *TICKS.lock() = to;
}
