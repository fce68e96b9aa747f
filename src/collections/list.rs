/*
 * Intrusive Ordered Doubly-Linked List
 *
 * A doubly-linked list whose links are embedded in the owning objects. The
 * list stores raw pointers to `ListLink<T>` nodes; each node carries a
 * back-pointer to the object that contains it, so membership costs no
 * allocation and a node can be unlinked in O(1) given only the link.
 *
 * ORDERED OPERATIONS:
 * ===================
 *
 * `insert_ordered` and `sort` take a comparator closure returning true iff
 * the left element must precede the right one. Insertion goes in front of
 * the first element for which the comparator holds, which makes both
 * operations stable: an element equal to ones already present lands after
 * them. The scheduler relies on this for round-robin fairness among
 * equal-priority threads.
 *
 * SAFETY CONTRACT:
 * ===============
 *
 * Every operation that touches links is unsafe. The caller guarantees:
 * - each link was bound to its owner with `bind` and the owner is alive,
 * - a link is in at most one list at a time,
 * - `remove` is only called with a link currently in *this* list,
 * - all mutation happens under the interrupt-disable discipline that
 *   serializes scheduler state (single CPU).
 *
 * A thread embeds two links: one for ready/sleep/waiter membership (those
 * are mutually exclusive states) and one for donation membership, so it can
 * be on a waiter list and a donation list at the same time.
 */

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

/// A link node embedded in a list element of type `T`.
pub struct ListLink<T> {
    next: *mut ListLink<T>,
    prev: *mut ListLink<T>,
    owner: *mut T,
}

impl<T> ListLink<T> {
    pub const fn new() -> Self {
        Self {
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
            owner: ptr::null_mut(),
        }
    }

    /// Record which object contains this link. Must be called once the
    /// owner's final address is known, before the link enters any list.
    pub fn bind(&mut self, owner: *mut T) {
        self.owner = owner;
    }

    /// The object containing this link.
    ///
    /// # Safety
    /// The link must have been bound and the owner must still be alive.
    pub unsafe fn owner(&self) -> NonNull<T> {
        debug_assert!(!self.owner.is_null());
        unsafe { NonNull::new_unchecked(self.owner) }
    }
}

impl<T> Default for ListLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Intrusive doubly-linked list over `ListLink<T>` nodes.
pub struct List<T> {
    front: *mut ListLink<T>,
    back: *mut ListLink<T>,
    len: usize,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            front: ptr::null_mut(),
            back: ptr::null_mut(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// `link` is bound, alive, and not in any list.
    pub unsafe fn push_front(&mut self, link: NonNull<ListLink<T>>) {
        let link_ptr = link.as_ptr();
        unsafe {
            (*link_ptr).prev = ptr::null_mut();
            (*link_ptr).next = self.front;
            if self.front.is_null() {
                self.back = link_ptr;
            } else {
                (*self.front).prev = link_ptr;
            }
        }
        self.front = link_ptr;
        self.len += 1;
    }

    /// # Safety
    /// `link` is bound, alive, and not in any list.
    pub unsafe fn push_back(&mut self, link: NonNull<ListLink<T>>) {
        let link_ptr = link.as_ptr();
        unsafe {
            (*link_ptr).next = ptr::null_mut();
            (*link_ptr).prev = self.back;
            if self.back.is_null() {
                self.front = link_ptr;
            } else {
                (*self.back).next = link_ptr;
            }
        }
        self.back = link_ptr;
        self.len += 1;
    }

    /// Owner of the first element without removing it.
    ///
    /// # Safety
    /// All listed links must be bound to live owners.
    pub unsafe fn front(&self) -> Option<NonNull<T>> {
        if self.front.is_null() {
            None
        } else {
            Some(unsafe { (*self.front).owner() })
        }
    }

    /// Remove and return the first element's link.
    ///
    /// # Safety
    /// All listed links must be bound to live owners.
    pub unsafe fn pop_front_link(&mut self) -> Option<NonNull<ListLink<T>>> {
        let link = NonNull::new(self.front)?;
        unsafe { self.unlink(link) };
        Some(link)
    }

    /// Remove and return the owner of the first element.
    ///
    /// # Safety
    /// All listed links must be bound to live owners.
    pub unsafe fn pop_front(&mut self) -> Option<NonNull<T>> {
        match unsafe { self.pop_front_link() } {
            Some(link) => Some(unsafe { link.as_ref().owner() }),
            None => None,
        }
    }

    /// Unlink `link` from this list.
    ///
    /// # Safety
    /// `link` is currently an element of this list.
    pub unsafe fn remove(&mut self, link: NonNull<ListLink<T>>) {
        unsafe { self.unlink(link) };
    }

    unsafe fn unlink(&mut self, link: NonNull<ListLink<T>>) {
        let link_ptr = link.as_ptr();
        unsafe {
            let prev = (*link_ptr).prev;
            let next = (*link_ptr).next;
            if prev.is_null() {
                debug_assert_eq!(self.front, link_ptr);
                self.front = next;
            } else {
                (*prev).next = next;
            }
            if next.is_null() {
                debug_assert_eq!(self.back, link_ptr);
                self.back = prev;
            } else {
                (*next).prev = prev;
            }
            (*link_ptr).prev = ptr::null_mut();
            (*link_ptr).next = ptr::null_mut();
        }
        self.len -= 1;
    }

    /// Insert `link` in front of the first element `e` for which
    /// `precedes(new, e)` holds, or at the back if none does.
    ///
    /// # Safety
    /// As for `push_back`; additionally all listed links are bound to live
    /// owners so the comparator can be applied.
    pub unsafe fn insert_ordered<F>(&mut self, link: NonNull<ListLink<T>>, precedes: F)
    where
        F: Fn(&T, &T) -> bool,
    {
        unsafe {
            let new_owner = link.as_ref().owner();
            let mut cursor = self.front;
            while !cursor.is_null() {
                let existing = (*cursor).owner();
                if precedes(new_owner.as_ref(), existing.as_ref()) {
                    break;
                }
                cursor = (*cursor).next;
            }
            match NonNull::new(cursor) {
                None => self.push_back(link),
                Some(at) => self.insert_before(link, at),
            }
        }
    }

    /// # Safety
    /// `at` is an element of this list; `link` is bound, alive, unlisted.
    unsafe fn insert_before(&mut self, link: NonNull<ListLink<T>>, at: NonNull<ListLink<T>>) {
        let link_ptr = link.as_ptr();
        let at_ptr = at.as_ptr();
        unsafe {
            let prev = (*at_ptr).prev;
            (*link_ptr).next = at_ptr;
            (*link_ptr).prev = prev;
            (*at_ptr).prev = link_ptr;
            if prev.is_null() {
                self.front = link_ptr;
            } else {
                (*prev).next = link_ptr;
            }
        }
        self.len += 1;
    }

    /// Stable insertion sort. Cheap for the short, mostly-sorted lists the
    /// scheduler keeps; element priorities drift while threads are blocked,
    /// so waiter lists are re-sorted before a wake.
    ///
    /// # Safety
    /// All listed links are bound to live owners.
    pub unsafe fn sort<F>(&mut self, precedes: F)
    where
        F: Fn(&T, &T) -> bool,
    {
        let mut sorted = List::new();
        unsafe {
            while let Some(link) = self.pop_front_link() {
                sorted.insert_ordered(link, &precedes);
            }
        }
        *self = sorted;
    }

    /// Iterate over element owners, front to back.
    ///
    /// # Safety
    /// All listed links are bound to live owners, and the list is not
    /// mutated while the iterator is alive.
    pub unsafe fn iter(&self) -> Iter<'_, T> {
        Iter {
            cursor: self.front,
            _list: PhantomData,
        }
    }

    /// Remove every element whose owner satisfies `pred`.
    ///
    /// # Safety
    /// All listed links are bound to live owners.
    pub unsafe fn remove_when<F>(&mut self, pred: F)
    where
        F: Fn(&T) -> bool,
    {
        let mut cursor = self.front;
        while !cursor.is_null() {
            unsafe {
                let next = (*cursor).next;
                let owner = (*cursor).owner();
                if pred(owner.as_ref()) {
                    self.unlink(NonNull::new_unchecked(cursor));
                }
                cursor = next;
            }
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    cursor: *mut ListLink<T>,
    _list: PhantomData<&'a List<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<NonNull<T>> {
        let link = NonNull::new(self.cursor)?;
        unsafe {
            self.cursor = (*link.as_ptr()).next;
            Some(link.as_ref().owner())
        }
    }
}
