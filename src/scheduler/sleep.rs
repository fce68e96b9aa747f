/*
 * Timed Sleep (Alarm) Queue
 *
 * Threads that sleep are parked on a queue ordered by ascending wake tick
 * and drained by the timer interrupt. Because the queue is sorted, the tick
 * handler stops at the first thread that is not yet due, so a tick costs
 * O(threads actually waking) rather than O(sleepers).
 *
 * Ties on the wake tick are broken by descending priority, so of two
 * threads due on the same tick the more urgent one is readied first.
 */

use core::ptr::NonNull;

use crate::interrupt;

use super::thread::{self, Thread};
use super::types::Tick;
use super::{block, current, preempt_if_higher, unblock, with_sched};

/// True iff `a` must wake before `b`.
pub(crate) fn wakes_first(a: &Thread, b: &Thread) -> bool {
    a.wakeup_tick < b.wakeup_tick
        || (a.wakeup_tick == b.wakeup_tick && a.priority > b.priority)
}

/// Park the calling thread until the tick counter reaches `deadline`.
///
/// Preconditions: interrupts enabled, not in interrupt context, and the
/// caller is not the idle thread (idle must always be dispatchable).
pub fn sleep_until(deadline: Tick) {
    assert!(interrupt::enabled(), "sleep with interrupts disabled");
    assert!(!interrupt::in_interrupt(), "cannot sleep in interrupt context");

    let old = interrupt::disable();

    let curr = current();
    with_sched(|ctx| {
        assert!(ctx.current != ctx.idle, "the idle thread cannot sleep");
    });

    unsafe {
        (*curr.as_ptr()).wakeup_tick = deadline;
    }
    with_sched(|ctx| unsafe {
        ctx.sleep.insert_ordered(thread::elem_link(curr), wakes_first);
    });
    block();

    interrupt::restore(old);
}

/// Ready every sleeper whose wake tick has arrived. Called from the timer
/// interrupt with `now` being the tick that just elapsed; each wake runs
/// the preemption check (deferred to interrupt return in this context).
pub(crate) fn wakeup(now: Tick) {
    let _gate = interrupt::IntrGuard::new();

    loop {
        let due: Option<NonNull<Thread>> = with_sched(|ctx| unsafe {
            match ctx.sleep.front() {
                Some(head) if head.as_ref().wakeup_tick <= now => ctx.sleep.pop_front(),
                _ => None,
            }
        });

        match due {
            Some(thread) => {
                unblock(thread);
                preempt_if_higher();
            }
            None => break,
        }
    }
}
