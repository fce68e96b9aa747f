/*
 * Semaphore Tests
 *
 * Counter laws, priority-ordered wakes, and the re-sort that keeps wake
 * order correct when a waiter's priority changes while it is suspended.
 */

use super::{
    boot_thread, make_thread, park_on_sema, priority_of, run, set_current, status_of, tid_of,
};
use crate::scheduler::thread::ThreadStatus;
use crate::scheduler::types::Priority;
use crate::scheduler;
use crate::sync::{Lock, Semaphore};

#[test]
fn counter_decrements_and_increments() {
    run(|| {
        let sema = Semaphore::new(2);
        sema.down();
        assert_eq!(sema.value(), 1);
        sema.down();
        assert_eq!(sema.value(), 0);

        sema.up();
        assert_eq!(sema.value(), 1);
        sema.up();
        assert_eq!(sema.value(), 2);
    });
}

#[test]
fn try_down_never_blocks() {
    run(|| {
        let sema = Semaphore::new(1);
        assert!(sema.try_down());
        assert_eq!(sema.value(), 0);
        assert!(!sema.try_down());
        assert_eq!(sema.value(), 0);

        sema.up();
        assert!(sema.try_down());
    });
}

#[test]
fn ups_wake_waiters_in_priority_order() {
    run(|| {
        // S4: waiters arrive at 10, 30, 20; wakes deliver 30, 20, 10.
        scheduler::set_priority(Priority::MAX);
        let sema = Semaphore::new(0);
        let t10 = make_thread("ten", Priority(10));
        let t30 = make_thread("thirty", Priority(30));
        let t20 = make_thread("twenty", Priority(20));
        park_on_sema(&sema, t10);
        park_on_sema(&sema, t30);
        park_on_sema(&sema, t20);
        assert_eq!(sema.waiter_count(), 3);

        sema.up();
        assert_eq!(status_of(t30), ThreadStatus::Ready);
        assert_eq!(status_of(t20), ThreadStatus::Blocked);
        assert_eq!(status_of(t10), ThreadStatus::Blocked);

        sema.up();
        assert_eq!(status_of(t20), ThreadStatus::Ready);
        assert_eq!(status_of(t10), ThreadStatus::Blocked);

        sema.up();
        assert_eq!(status_of(t10), ThreadStatus::Ready);
        assert_eq!(sema.waiter_count(), 0);
        assert_eq!(
            super::ready_tids(),
            [tid_of(t30), tid_of(t20), tid_of(t10)]
        );
    });
}

#[test]
fn equal_priority_waiters_wake_in_arrival_order() {
    run(|| {
        scheduler::set_priority(Priority::MAX);
        let sema = Semaphore::new(0);
        let first = make_thread("first", Priority(20));
        let second = make_thread("second", Priority(20));
        park_on_sema(&sema, first);
        park_on_sema(&sema, second);

        sema.up();
        assert_eq!(status_of(first), ThreadStatus::Ready);
        assert_eq!(status_of(second), ThreadStatus::Blocked);
    });
}

#[test]
fn up_reorders_waiters_whose_priority_rose_while_suspended() {
    run(|| {
        // b queues behind a, then receives a donation that outranks a; the
        // next up must deliver b.
        scheduler::set_priority(Priority::MAX);
        let boot = boot_thread();
        let sema = Semaphore::new(0);

        let a = make_thread("a", Priority(20));
        let b = make_thread("b", Priority(10));

        let held_by_b = Lock::new();
        set_current(b);
        held_by_b.acquire();
        set_current(boot);

        park_on_sema(&sema, a);
        park_on_sema(&sema, b);

        let donor = make_thread("donor", Priority(40));
        unsafe { held_by_b.register_donor(donor) };
        park_on_sema(held_by_b.sema_for_tests(), donor);
        assert_eq!(priority_of(b), Priority(40));

        sema.up();
        assert_eq!(status_of(b), ThreadStatus::Ready);
        assert_eq!(status_of(a), ThreadStatus::Blocked);
    });
}

#[test]
fn up_with_no_waiters_just_banks_the_count() {
    run(|| {
        let sema = Semaphore::new(0);
        sema.up();
        sema.up();
        assert_eq!(sema.value(), 2);
        assert_eq!(sema.waiter_count(), 0);
    });
}

#[test]
#[should_panic(expected = "interrupt context")]
fn down_from_an_interrupt_handler_is_fatal() {
    run(|| {
        let sema = Semaphore::new(1);
        super::enter_isr();
        sema.down();
    });
}
