/*
 * Thread Control Block
 *
 * Each thread occupies exactly one 4 KiB page. The control block sits at the
 * bottom of the page and the thread's kernel stack fills the remainder,
 * growing downward toward the control block:
 *
 *      4 kB +---------------------------------+
 *           |          kernel stack           |
 *           |                |                |
 *           |                v                |
 *           |         grows downward          |
 *           +---------------------------------+
 *           |              magic              |
 *           |              frame              |
 *           |                :                |
 *           |              status             |
 *           |               tid               |
 *      0 kB +---------------------------------+
 *
 * `magic` is the last field of the control block, so a stack that grows too
 * far corrupts it first; `scheduler::current()` verifies it on every access
 * and panics on a mismatch.
 *
 * A thread participates in scheduler lists through two embedded hooks:
 * `elem` for ready/sleep/waiter membership (those states are mutually
 * exclusive) and `donation_elem` for membership in a lock holder's donation
 * list. Both are bound to the control block when the page is initialized.
 */

use core::ptr::NonNull;

use heapless::String;

use crate::collections::{List, ListLink};
use crate::interrupt;
use crate::machine::IntrLevel;
use crate::sync::Lock;

use super::types::{Priority, THREAD_NAME_MAX, THREAD_PAGE_SIZE, Tick, Tid};

/// Stack canary at the far end of the control block. ASCII "lark".
pub const THREAD_MAGIC: u32 = 0x6c61_726b;

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Currently executing. Exactly one thread at any moment, except inside
    /// the atomic window of `schedule`.
    Running,
    /// On the ready queue, waiting for the CPU.
    Ready,
    /// Waiting on a waiter list or the sleep queue.
    Blocked,
    /// Finished; its page is freed on a later scheduler pass.
    Dying,
}

/// Entry point of a kernel thread.
pub type ThreadFunc = fn(aux: *mut ());

/// Interrupt return frame: the registers the CPU consumes on `iretq`.
///
/// Layout is hardware-defined; `#[repr(C)]` keeps it exact.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Default for InterruptFrame {
    fn default() -> Self {
        Self {
            rip: 0,
            cs: 0x08,      // kernel code segment (embedder's GDT)
            rflags: 0x202, // IF=1, reserved bit 1 always set
            rsp: 0,
            ss: 0x10, // kernel data segment
        }
    }
}

/// Complete register context saved across a context switch: all general
/// purpose registers plus the interrupt return frame. The machine's switch
/// primitive fills this on the way out and resumes from it on the way in.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub iret_frame: InterruptFrame,
}

/// Thread control block. Lives at the base of its page; never moved.
#[repr(C)]
pub struct Thread {
    pub(crate) tid: Tid,
    pub(crate) status: ThreadStatus,
    pub(crate) name: String<THREAD_NAME_MAX>,

    /// Effective priority: `max(init_priority, highest donated)`.
    pub(crate) priority: Priority,
    /// Priority set by the thread's owner, absent donation.
    pub(crate) init_priority: Priority,

    /// Valid only while the thread is on the sleep queue.
    pub(crate) wakeup_tick: Tick,

    /// Lock this thread is blocked acquiring, if any. Non-owning; cleared on
    /// the acquire path once the lock is obtained.
    pub(crate) wait_on_lock: *const Lock,
    /// Threads that donated their priority to this one, highest first.
    pub(crate) donations: List<Thread>,

    /// Hook for ready queue, sleep queue or a waiter list (at most one).
    pub(crate) elem: ListLink<Thread>,
    /// Hook for membership in a holder's donation list.
    pub(crate) donation_elem: ListLink<Thread>,

    /// Register context for the machine's switch primitive.
    pub(crate) frame: SwitchFrame,

    magic: u32,
}

impl Thread {
    /// Initialize a control block in place at the base of `page` and return
    /// a pointer to it. The new thread starts `Blocked` with no tid.
    ///
    /// # Safety
    /// `page` is a zeroed `THREAD_PAGE_SIZE` page owned by the caller.
    pub(crate) unsafe fn init_at(page: NonNull<u8>, name: &str, priority: Priority) -> NonNull<Thread> {
        assert!(priority.is_valid(), "priority {priority} out of range");

        let thread = page.cast::<Thread>();
        unsafe {
            thread.as_ptr().write(Thread {
                tid: Tid(0),
                status: ThreadStatus::Blocked,
                name: truncated_name(name),
                priority,
                init_priority: priority,
                wakeup_tick: 0,
                wait_on_lock: core::ptr::null(),
                donations: List::new(),
                elem: ListLink::new(),
                donation_elem: ListLink::new(),
                frame: SwitchFrame::default(),
                magic: THREAD_MAGIC,
            });

            let t = thread.as_ptr();
            (*t).elem.bind(t);
            (*t).donation_elem.bind(t);
            // Stack pointer starts just below the top of the page, offset as
            // if a call had just pushed a return address.
            (*t).frame.iret_frame.rsp = page.as_ptr() as u64 + THREAD_PAGE_SIZE as u64 - 8;
        }
        thread
    }

    /// Seed the context so the first dispatch enters `thread_entry` with
    /// `func` and `aux` in the argument registers.
    pub(crate) fn seed_context(&mut self, func: ThreadFunc, aux: *mut ()) {
        self.frame.iret_frame.rip = thread_entry as usize as u64;
        self.frame.rdi = func as usize as u64;
        self.frame.rsi = aux as usize as u64;
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Effective priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// True while the stack canary is intact.
    pub fn canary_intact(&self) -> bool {
        self.magic == THREAD_MAGIC
    }

    #[cfg(test)]
    pub(crate) fn corrupt_canary_for_tests(&mut self) {
        self.magic = 0;
    }

    /// Recompute the effective priority from `init_priority` and the
    /// donation list. Donor priorities drift while queued (a third party may
    /// donate to *them*), so the list is re-sorted before its front is
    /// trusted. Interrupts must be off.
    pub(crate) fn refresh_priority(&mut self) {
        unsafe {
            self.donations.sort(higher_priority);
            self.priority = match self.donations.front() {
                Some(front) => self.init_priority.max(front.as_ref().priority),
                None => self.init_priority,
            };
        }
    }
}

/// The ready/sleep/waiter hook of a thread, as a list handle.
///
/// # Safety
/// `thread` points to a live, initialized control block.
pub(crate) unsafe fn elem_link(thread: NonNull<Thread>) -> NonNull<ListLink<Thread>> {
    unsafe { NonNull::new_unchecked(&raw mut (*thread.as_ptr()).elem) }
}

/// The donation hook of a thread, as a list handle.
///
/// # Safety
/// `thread` points to a live, initialized control block.
pub(crate) unsafe fn donation_link(thread: NonNull<Thread>) -> NonNull<ListLink<Thread>> {
    unsafe { NonNull::new_unchecked(&raw mut (*thread.as_ptr()).donation_elem) }
}

/// Comparator for priority-ordered thread lists: strictly-higher effective
/// priority goes first, so equals keep insertion order.
pub(crate) fn higher_priority(a: &Thread, b: &Thread) -> bool {
    a.priority > b.priority
}

fn truncated_name(name: &str) -> String<THREAD_NAME_MAX> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// First frame of every spawned thread. The scheduler dispatches with
/// interrupts off; re-enable them, run the thread function, and exit if it
/// returns.
extern "C" fn thread_entry(func: ThreadFunc, aux: *mut ()) -> ! {
    interrupt::restore(IntrLevel::On);
    func(aux);
    super::exit();
}
