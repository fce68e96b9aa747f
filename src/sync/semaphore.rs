/*
 * Counting Semaphore
 *
 * A non-negative counter plus a priority-ordered waiter list. `down` blocks
 * the caller while the counter is zero; `up` wakes the highest-priority
 * waiter and increments the counter.
 *
 * The waiter list is re-sorted on every `up` rather than trusted from
 * insertion time: a waiter's effective priority can rise while it is
 * suspended (a third party donates to it through a lock it holds), and the
 * wake must go to whoever is most urgent *now*.
 */

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::collections::List;
use crate::interrupt;
use crate::scheduler::thread::{self, Thread};
use crate::scheduler::{self, block, preempt_if_higher, unblock};

pub struct Semaphore {
    value: UnsafeCell<u32>,
    waiters: UnsafeCell<List<Thread>>,
}

// Interior state is only touched with interrupts disabled (single CPU).
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            value: UnsafeCell::new(value),
            waiters: UnsafeCell::new(List::new()),
        }
    }

    /// Decrement the counter, blocking until it is positive.
    ///
    /// Must not be called from interrupt context: it may suspend.
    pub fn down(&self) {
        assert!(
            !interrupt::in_interrupt(),
            "semaphore down in interrupt context"
        );

        let old = interrupt::disable();
        let curr = scheduler::current();
        unsafe {
            while *self.value.get() == 0 {
                self.enqueue_waiter(curr);
                block();
            }
            *self.value.get() -= 1;
        }
        interrupt::restore(old);
    }

    /// Decrement the counter if it is positive; never blocks. Returns
    /// whether the decrement happened.
    pub fn try_down(&self) -> bool {
        let _gate = interrupt::IntrGuard::new();
        unsafe {
            let value = self.value.get();
            if *value > 0 {
                *value -= 1;
                true
            } else {
                false
            }
        }
    }

    /// Increment the counter and wake the highest-priority waiter, if any.
    /// Preempts the caller if the woken thread outranks it.
    ///
    /// Safe from interrupt context; the preemption is then deferred to the
    /// interrupt return path.
    pub fn up(&self) {
        let old = interrupt::disable();
        unsafe {
            let waiters = &mut *self.waiters.get();
            if !waiters.is_empty() {
                // Priorities may have shifted (donation) since the waiters
                // queued; re-sort so the front is the most urgent now.
                waiters.sort(thread::higher_priority);
                if let Some(winner) = waiters.pop_front() {
                    unblock(winner);
                }
            }
            *self.value.get() += 1;
        }
        preempt_if_higher();
        interrupt::restore(old);
    }

    /// Current counter value.
    pub fn value(&self) -> u32 {
        let _gate = interrupt::IntrGuard::new();
        unsafe { *self.value.get() }
    }

    /// Queue `thread` on the waiter list, priority ordered after equals.
    /// Interrupts must be off; the caller transitions the thread to
    /// `Blocked` (via `block`) afterwards.
    pub(crate) unsafe fn enqueue_waiter(&self, thread: NonNull<Thread>) {
        unsafe {
            (*self.waiters.get())
                .insert_ordered(thread::elem_link(thread), thread::higher_priority);
        }
    }

    /// Number of threads currently waiting. Diagnostics only.
    pub fn waiter_count(&self) -> usize {
        let _gate = interrupt::IntrGuard::new();
        unsafe { (*self.waiters.get()).len() }
    }
}
