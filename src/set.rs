//! Rule sequence storage and reader snapshots.
//!
//! The cache publishes its rules as a `RuleSet`: a heap-allocated slot array
//! whose length equals the rule count and never changes after publication.
//! Each slot is an epoch-managed atomic pointer, so the two kinds of mutation
//! the cache performs map onto two visibility contracts:
//!
//! - **In-place slot swaps** (promotion, exact-slot replacement): a single
//!   atomic pointer store per slot. A concurrent reader may observe a
//!   rotation half-applied (one rule transiently visible in two slots),
//!   but never a torn or dangling element.
//! - **Republication** (growth, insert-at-position): a brand-new `RuleSet`
//!   is built and swapped in. Readers still iterating the superseded set see
//!   a fully consistent prior snapshot.
//!
//! # Reclamation
//!
//! Superseded sets and evicted rules are retired through `crossbeam_epoch`:
//! they are freed only once every reader pinned before the retirement has
//! finished. That is what makes the lock-free read path safe against the
//! eviction path: a reader that loaded a slot just before the rule was
//! evicted can still dereference it for as long as its snapshot lives.

use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard};

use crate::cache::RuleCache;
use crate::rule::CachedRule;

// =============================================================================
// Rule Set (internal storage)
// =============================================================================

/// The published slot array. Length == rule count, fixed at construction.
///
/// Dropping a `RuleSet` frees only the slot array, never the rules the slots
/// point to: rule pointers are shared across superseded and current sets, and
/// each rule is retired exactly once, when it leaves the cache.
pub(crate) struct RuleSet<T> {
    pub(crate) slots: Box<[Atomic<CachedRule<T>>]>,
}

impl<T> RuleSet<T> {
    /// An empty sequence (cache construction state).
    pub(crate) fn empty() -> Self {
        Self::with_len(0)
    }

    /// Allocate a set of `len` null slots for the writer to fill before
    /// publication.
    pub(crate) fn with_len(len: usize) -> Self {
        let slots: Vec<Atomic<CachedRule<T>>> = (0..len).map(|_| Atomic::null()).collect();
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Number of rules in this set.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

// =============================================================================
// Rules (reader snapshot)
// =============================================================================

/// A lock-free read of the cache's current rule sequence.
///
/// Obtained from [`RuleCache::rules`]. The snapshot pins the epoch on
/// creation, so every rule reference handed out stays valid until the
/// snapshot is dropped, even if concurrent writers evict, replace, or
/// republish in the meantime.
///
/// Iteration order is the cache's priority order: index 0 first. Under a
/// concurrent promotion a reader may see the sequence mid-rotation; the scan
/// does marginally more or less work that call, nothing else.
pub struct Rules<'c, T> {
    guard: Guard,
    set: *const RuleSet<T>,
    _cache: PhantomData<&'c RuleCache<T>>,
}

impl<'c, T> Rules<'c, T> {
    /// Wrap a set pointer loaded under `guard`.
    pub(crate) fn new(guard: Guard, set: *const RuleSet<T>) -> Self {
        Self {
            guard,
            set,
            _cache: PhantomData,
        }
    }

    /// Number of rules in the snapshot. Fixed for the snapshot's lifetime.
    #[inline]
    pub fn len(&self) -> usize {
        self.set().len()
    }

    /// Whether the snapshot holds no rules.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rule at `index`, or `None` past the end.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&CachedRule<T>> {
        let slot = self.set().slots.get(index)?;
        let rule = slot.load(Ordering::Acquire, &self.guard);
        if rule.is_null() {
            return None;
        }
        // SAFETY: non-null slot pointers always point at a live rule: rules
        // are retired through the epoch only after being unlinked from every
        // slot, and `self.guard` was pinned before this load.
        Some(unsafe { rule.deref() })
    }

    /// Iterate rules in priority order.
    #[inline]
    pub fn iter(&self) -> RulesIter<'_, 'c, T> {
        RulesIter {
            rules: self,
            index: 0,
        }
    }

    #[inline]
    fn set(&self) -> &RuleSet<T> {
        // SAFETY: `set` was loaded from the cache's published pointer while
        // `self.guard` was pinned; superseded sets are retired through the
        // epoch and cannot be freed while this snapshot is alive.
        unsafe { &*self.set }
    }
}

impl<'a, 'c, T> IntoIterator for &'a Rules<'c, T> {
    type Item = &'a CachedRule<T>;
    type IntoIter = RulesIter<'a, 'c, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`Rules`] snapshot.
pub struct RulesIter<'a, 'c, T> {
    rules: &'a Rules<'c, T>,
    index: usize,
}

impl<'a, 'c, T> Iterator for RulesIter<'a, 'c, T> {
    type Item = &'a CachedRule<T>;

    fn next(&mut self) -> Option<&'a CachedRule<T>> {
        while self.index < self.rules.len() {
            let index = self.index;
            self.index += 1;
            if let Some(rule) = self.rules.get(index) {
                return Some(rule);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rules.len().saturating_sub(self.index);
        (0, Some(remaining))
    }
}
