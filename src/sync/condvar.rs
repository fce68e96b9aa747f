/*
 * Condition Variable
 *
 * Lets threads wait for a condition protected by a lock and be woken one at
 * a time, highest priority first.
 *
 * Each wait creates its own waiter record - a private semaphore initialized
 * to zero plus a list hook - on the waiting thread's stack. Giving every
 * waiter a private semaphore (instead of sharing one) is what lets `signal`
 * wake *exactly one* thread and *choose which*: each record has a single
 * known suspended thread, so the waiter list can be sorted by that thread's
 * current priority and the front popped.
 *
 * The record also stores a pointer to its thread, which is how "the
 * priority of the thread blocked on this record" is re-evaluated at signal
 * time rather than frozen at insertion.
 */

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::collections::{List, ListLink};
use crate::interrupt;
use crate::scheduler::{self, thread::Thread};

use super::{Lock, Semaphore};

/// One waiting thread. Stack-resident; lives exactly as long as the wait.
struct Waiter {
    sema: Semaphore,
    thread: *mut Thread,
    elem: ListLink<Waiter>,
}

/// True iff `a`'s blocked thread currently outranks `b`'s.
fn more_urgent(a: &Waiter, b: &Waiter) -> bool {
    unsafe { (*a.thread).priority() > (*b.thread).priority() }
}

pub struct Condvar {
    waiters: UnsafeCell<List<Waiter>>,
}

// Interior state is only touched with interrupts disabled (single CPU).
unsafe impl Sync for Condvar {}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: UnsafeCell::new(List::new()),
        }
    }

    /// Atomically release `lock` and wait to be signalled; the lock is
    /// re-acquired before returning.
    ///
    /// Precondition: the caller holds `lock`; not in interrupt context.
    pub fn wait(&self, lock: &Lock) {
        assert!(!interrupt::in_interrupt(), "cond wait in interrupt context");
        assert!(
            lock.held_by_current_thread(),
            "cond wait without holding the lock"
        );

        let mut waiter = Waiter {
            sema: Semaphore::new(0),
            thread: scheduler::current().as_ptr(),
            elem: ListLink::new(),
        };
        let waiter_ptr: *mut Waiter = &mut waiter;
        waiter.elem.bind(waiter_ptr);

        {
            let _gate = interrupt::IntrGuard::new();
            unsafe {
                (*self.waiters.get())
                    .insert_ordered(NonNull::new_unchecked(&mut waiter.elem), more_urgent);
            }
        }

        lock.release();
        waiter.sema.down();
        lock.acquire();
    }

    /// Wake the waiter whose thread has the highest priority right now, if
    /// any waiter exists.
    ///
    /// Precondition: the caller holds `lock`; not in interrupt context.
    pub fn signal(&self, lock: &Lock) {
        assert!(!interrupt::in_interrupt(), "cond signal in interrupt context");
        assert!(
            lock.held_by_current_thread(),
            "cond signal without holding the lock"
        );

        let winner: Option<NonNull<Waiter>> = {
            let _gate = interrupt::IntrGuard::new();
            unsafe {
                let waiters = &mut *self.waiters.get();
                // Waiter priorities drift while suspended; sort before
                // choosing, like a semaphore does on up.
                waiters.sort(more_urgent);
                waiters.pop_front()
            }
        };

        // The record stays valid until its thread is released from its
        // semaphore: the up below is what frees it to return from wait.
        if let Some(waiter) = winner {
            unsafe {
                waiter.as_ref().sema.up();
            }
        }
    }

    /// Wake all current waiters, one signal at a time (highest priority
    /// first).
    pub fn broadcast(&self, lock: &Lock) {
        loop {
            let empty = {
                let _gate = interrupt::IntrGuard::new();
                unsafe { (*self.waiters.get()).is_empty() }
            };
            if empty {
                break;
            }
            self.signal(lock);
        }
    }

    /// Number of threads currently waiting. Diagnostics only.
    pub fn waiter_count(&self) -> usize {
        let _gate = interrupt::IntrGuard::new();
        unsafe { (*self.waiters.get()).len() }
    }

    /// Enqueue a waiter record for `thread` and park the thread on its
    /// private semaphore, exactly as `wait` does before suspending. The
    /// record is leaked instead of stack-resident; tests only observe wake
    /// order.
    #[cfg(test)]
    pub(crate) unsafe fn park_thread_for_tests(&self, thread: NonNull<Thread>) {
        use crate::scheduler::thread::ThreadStatus;
        use std::boxed::Box;

        let waiter: *mut Waiter = Box::leak(Box::new(Waiter {
            sema: Semaphore::new(0),
            thread: thread.as_ptr(),
            elem: ListLink::new(),
        }));

        let _gate = interrupt::IntrGuard::new();
        unsafe {
            (*waiter).elem.bind(waiter);
            (*self.waiters.get())
                .insert_ordered(NonNull::new_unchecked(&raw mut (*waiter).elem), more_urgent);
            (*waiter).sema.enqueue_waiter(thread);
            (*thread.as_ptr()).status = ThreadStatus::Blocked;
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
