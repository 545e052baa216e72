//! Callback lists that tolerate mutation during iteration.
//!
//! A [`LazyList`] keeps its entries in a stable vector. While at least one
//! iteration is in progress, removals only mark entries; marked entries are
//! skipped by every iteration and physically erased when the last
//! iteration ends. Entries added during an iteration are first seen by the
//! next one.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identity comparison used to deduplicate registrations.
pub trait SameCallback {
    /// Whether `self` and `other` are the same registration.
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameCallback for Rc<T> {
    fn same(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(self), Rc::as_ptr(other))
    }
}

struct Entry<T> {
    value: T,
    removed: bool,
}

/// A deduplicated list with deferred removal.
pub struct LazyList<T> {
    entries: RefCell<Vec<Entry<T>>>,
    locks: Cell<usize>,
    removed: Cell<usize>,
}

impl<T> Default for LazyList<T> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            locks: Cell::new(0),
            removed: Cell::new(0),
        }
    }
}

impl<T: Clone + SameCallback> LazyList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` unless an identical live entry is present.
    ///
    /// Re-adding an entry removed during the current iteration appends a
    /// fresh entry; the marked one is erased when the iteration ends.
    /// Returns `true` if the list changed.
    pub fn push_unique(&self, value: T) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.iter().any(|e| !e.removed && e.value.same(&value)) {
            return false;
        }
        entries.push(Entry {
            value,
            removed: false,
        });
        true
    }

    /// Remove the entry identical to `value`. Returns `true` if one was live.
    pub fn remove(&self, value: &T) -> bool {
        self.remove_where(|v| v.same(value)) > 0
    }

    /// Remove every live entry matching `pred`. Returns how many were removed.
    pub fn remove_where(&self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut entries = self.entries.borrow_mut();
        if self.locks.get() == 0 {
            let before = entries.len();
            entries.retain(|e| e.removed || !pred(&e.value));
            return before - entries.len();
        }
        let mut count = 0;
        for entry in entries.iter_mut().filter(|e| !e.removed) {
            if pred(&entry.value) {
                entry.removed = true;
                count += 1;
            }
        }
        self.removed.set(self.removed.get() + count);
        count
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.remove_where(|_| true);
    }

    /// Whether a live entry identical to `value` exists.
    pub fn contains(&self, value: &T) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|e| !e.removed && e.value.same(value))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len() - self.removed.get()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the live entries, in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| !e.removed)
            .map(|e| e.value.clone())
            .collect()
    }

    /// Call `f` on every live entry.
    ///
    /// `f` may add or remove entries of this list, or iterate it again.
    /// No borrow of the list is held while `f` runs.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let _guard = IterationGuard::new(self);
        let len = self.entries.borrow().len();
        for index in 0..len {
            let value = {
                let entries = self.entries.borrow();
                let entry = &entries[index];
                if entry.removed {
                    continue;
                }
                entry.value.clone()
            };
            f(&value);
        }
    }

    fn release(&self) {
        let locks = self.locks.get() - 1;
        self.locks.set(locks);
        if locks == 0 && self.removed.get() > 0 {
            self.removed.set(0);
            self.entries.borrow_mut().retain(|e| !e.removed);
        }
    }
}

/// Keeps a list locked for the duration of an iteration, including when a
/// callback unwinds.
struct IterationGuard<'a, T: Clone + SameCallback> {
    list: &'a LazyList<T>,
}

impl<'a, T: Clone + SameCallback> IterationGuard<'a, T> {
    fn new(list: &'a LazyList<T>) -> Self {
        list.locks.set(list.locks.get() + 1);
        Self { list }
    }
}

impl<T: Clone + SameCallback> Drop for IterationGuard<'_, T> {
    fn drop(&mut self) {
        self.list.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Cb = Rc<dyn Fn() -> u32>;

    fn cb(value: u32) -> Cb {
        Rc::new(move || value)
    }

    fn run(list: &LazyList<Cb>) -> Vec<u32> {
        let mut out = Vec::new();
        list.for_each(|f| out.push(f()));
        out
    }

    #[test]
    fn push_unique_deduplicates_by_identity() {
        let list = LazyList::new();
        let a = cb(1);
        assert!(list.push_unique(a.clone()));
        assert!(!list.push_unique(a.clone()));
        assert!(list.push_unique(cb(1)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn removal_during_iteration_is_deferred() {
        let list: Rc<LazyList<Cb>> = Rc::new(LazyList::new());
        let one = cb(1);
        let four = cb(4);
        let three: Cb = {
            let list = Rc::downgrade(&list);
            let (one, four) = (one.clone(), four.clone());
            Rc::new(move || {
                if let Some(list) = list.upgrade() {
                    list.remove(&four);
                    list.remove(&one);
                }
                3
            })
        };

        list.push_unique(one.clone());
        list.push_unique(cb(2));
        list.push_unique(three);
        list.push_unique(four.clone());

        // `four` is skipped once removed, `one` already ran.
        assert_eq!(run(&list), vec![1, 2, 3]);
        assert_eq!(run(&list), vec![2, 3]);
        assert_eq!(list.len(), 2);
        assert!(!list.contains(&four));
    }

    #[test]
    fn additions_during_iteration_wait_for_next_pass() {
        let list: Rc<LazyList<Cb>> = Rc::new(LazyList::new());
        let late = cb(9);
        let adder: Cb = {
            let list = Rc::downgrade(&list);
            let late = late.clone();
            Rc::new(move || {
                if let Some(list) = list.upgrade() {
                    list.push_unique(late.clone());
                }
                0
            })
        };
        list.push_unique(adder);

        assert_eq!(run(&list), vec![0]);
        assert_eq!(run(&list), vec![0, 9]);
    }

    #[test]
    fn readd_after_clear_waits_for_next_pass() {
        let list: Rc<LazyList<Cb>> = Rc::new(LazyList::new());
        let keep = cb(7);
        let clearer: Cb = {
            let list = Rc::downgrade(&list);
            let keep = keep.clone();
            Rc::new(move || {
                if let Some(list) = list.upgrade() {
                    list.clear();
                    list.push_unique(keep.clone());
                }
                0
            })
        };
        list.push_unique(clearer);
        list.push_unique(keep.clone());

        // `keep` sits after the clearer but was removed and re-added during
        // the pass, so it only runs on the next one.
        assert_eq!(run(&list), vec![0]);
        assert_eq!(list.snapshot().len(), 1);
        assert!(list.contains(&keep));
        assert_eq!(run(&list), vec![7]);
    }

    #[test]
    fn readd_of_later_entry_is_not_run_twice_or_early() {
        let list: Rc<LazyList<Cb>> = Rc::new(LazyList::new());
        let later = cb(8);
        let toggler: Cb = {
            let list = Rc::downgrade(&list);
            let later = later.clone();
            let done = Cell::new(false);
            Rc::new(move || {
                if done.replace(true) {
                    return 1;
                }
                if let Some(list) = list.upgrade() {
                    list.remove(&later);
                    assert!(list.push_unique(later.clone()));
                    assert!(!list.push_unique(later.clone()));
                }
                1
            })
        };
        list.push_unique(toggler);
        list.push_unique(later.clone());

        assert_eq!(run(&list), vec![1]);
        assert_eq!(list.len(), 2);
        assert_eq!(run(&list), vec![1, 8]);
    }

    #[test]
    fn nested_iteration() {
        let list: Rc<LazyList<Cb>> = Rc::new(LazyList::new());
        let inner_runs = Rc::new(Cell::new(0));
        let nested: Cb = {
            let list = Rc::downgrade(&list);
            let inner_runs = inner_runs.clone();
            Rc::new(move || {
                if inner_runs.get() == 0 {
                    inner_runs.set(1);
                    if let Some(list) = list.upgrade() {
                        list.for_each(|_| {});
                    }
                }
                5
            })
        };
        list.push_unique(nested);
        assert_eq!(run(&list), vec![5]);
        assert_eq!(inner_runs.get(), 1);
    }
}
