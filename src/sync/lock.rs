/*
 * Mutual-Exclusion Lock with Priority Donation
 *
 * A lock is a binary semaphore plus a holder pointer. The holder pointer is
 * what enables priority donation, the fix for priority inversion:
 *
 * If high-priority H blocks on a lock held by low-priority L while
 * medium-priority M is ready, M would starve L and therefore H. So when H
 * blocks, it donates its priority to L for as long as L holds the lock.
 * Donation is transitive: if L is itself blocked on a lock held by L2, the
 * donation propagates down the chain (H -> L -> L2), bounded at
 * DONATION_DEPTH hops so a pathological or circular chain costs bounded
 * work - the kernel does not detect deadlock.
 *
 * BOOKKEEPING:
 * ===========
 *
 * Each blocked acquirer records the lock in its own `wait_on_lock` and
 * enqueues itself on the holder's `donations` list (via the dedicated
 * donation hook, so it can simultaneously sit on the lock's waiter list).
 * On release, the holder drops exactly the donors that were waiting for
 * *this* lock - identified by their `wait_on_lock` - and recomputes its
 * effective priority from what remains. The donor entries are weak
 * references: a donor removes itself from the relationship on the release
 * path, never through a destructor.
 */

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};

use crate::interrupt;
use crate::scheduler::thread::{self, Thread};
use crate::scheduler;
use crate::scheduler::types::DONATION_DEPTH;

use super::Semaphore;

pub struct Lock {
    /// Thread holding the lock, or null. At most one holder at a time.
    holder: UnsafeCell<*mut Thread>,
    /// Binary semaphore carrying the waiter list.
    sema: Semaphore,
}

// Interior state is only touched with interrupts disabled (single CPU).
unsafe impl Sync for Lock {}

impl Lock {
    pub const fn new() -> Self {
        Self {
            holder: UnsafeCell::new(ptr::null_mut()),
            sema: Semaphore::new(1),
        }
    }

    /// Acquire the lock, blocking until it is free and donating the
    /// caller's priority down the holder chain while it waits.
    ///
    /// Must not be called from interrupt context, and the caller must not
    /// already hold this lock.
    pub fn acquire(&self) {
        assert!(
            !interrupt::in_interrupt(),
            "lock acquire in interrupt context"
        );
        assert!(
            !self.held_by_current_thread(),
            "lock acquired twice by the same thread"
        );

        let old = interrupt::disable();
        let curr = scheduler::current();

        unsafe {
            if !(*self.holder.get()).is_null() {
                self.register_donor(curr);
            }
        }

        self.sema.down();

        unsafe {
            (*curr.as_ptr()).wait_on_lock = ptr::null();
            *self.holder.get() = curr.as_ptr();
        }
        interrupt::restore(old);
    }

    /// Acquire the lock without blocking. No donation occurs on failure.
    pub fn try_acquire(&self) -> bool {
        assert!(
            !self.held_by_current_thread(),
            "lock acquired twice by the same thread"
        );

        let _gate = interrupt::IntrGuard::new();
        let acquired = self.sema.try_down();
        if acquired {
            unsafe {
                *self.holder.get() = scheduler::current().as_ptr();
            }
        }
        acquired
    }

    /// Release the lock, retracting the donations it motivated, and wake
    /// the highest-priority waiter.
    ///
    /// Precondition: the caller holds the lock.
    pub fn release(&self) {
        assert!(
            self.held_by_current_thread(),
            "lock released by a thread that does not hold it"
        );

        let old = interrupt::disable();
        let curr = scheduler::current();

        unsafe {
            let me = curr.as_ptr();
            let this = self as *const Lock;

            // Drop exactly the donors that donated because of this lock,
            // then fall back to whatever priority the rest still justify.
            (*me).donations.remove_when(|donor| donor.wait_on_lock == this);
            (*me).refresh_priority();

            *self.holder.get() = ptr::null_mut();
        }

        self.sema.up();
        interrupt::restore(old);
    }

    /// Whether the calling thread holds this lock.
    pub fn held_by_current_thread(&self) -> bool {
        self.holder() == scheduler::current().as_ptr()
    }

    pub(crate) fn holder(&self) -> *mut Thread {
        let _gate = interrupt::IntrGuard::new();
        unsafe { *self.holder.get() }
    }

    /// Number of threads currently blocked on this lock. Diagnostics only.
    pub fn waiter_count(&self) -> usize {
        self.sema.waiter_count()
    }

    /// Record `donor` (the thread about to block on this lock) in the
    /// donation bookkeeping and propagate its priority down the holder
    /// chain. Interrupts must be off and the lock must have a holder.
    pub(crate) unsafe fn register_donor(&self, donor: NonNull<Thread>) {
        unsafe {
            let holder = *self.holder.get();
            debug_assert!(!holder.is_null());

            (*donor.as_ptr()).wait_on_lock = self as *const Lock;
            (*holder)
                .donations
                .insert_ordered(thread::donation_link(donor), thread::higher_priority);

            donate_priority(donor);
        }
    }
}

#[cfg(test)]
impl Lock {
    pub(crate) fn sema_for_tests(&self) -> &Semaphore {
        &self.sema
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Propagate `donor`'s effective priority along the chain of lock holders
/// it is (transitively) blocked behind: each holder is raised to at least
/// the donated priority. Iterative with a fixed depth bound; no recursion
/// on the kernel stack.
///
/// # Safety
/// Interrupts off; `donor` and every thread reachable through the chain are
/// live control blocks.
unsafe fn donate_priority(donor: NonNull<Thread>) {
    unsafe {
        let donated = donor.as_ref().priority;
        let mut t: *mut Thread = donor.as_ptr();

        for _ in 0..DONATION_DEPTH {
            let lock = (*t).wait_on_lock;
            if lock.is_null() {
                break;
            }
            let holder = *(*lock).holder.get();
            if holder.is_null() {
                break;
            }
            (*holder).priority = (*holder).priority.max(donated);
            t = holder;
        }
    }
}
