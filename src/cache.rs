//! The per-call-site rule cache.
//!
//! One `RuleCache` serves one dispatch site (or one operation family sharing
//! a result shape). It holds the site's compiled rules in priority order and
//! is tuned for the access pattern dispatch sites actually exhibit: the vast
//! majority of calls hit one of a few recently successful rules near the
//! front of the sequence.
//!
//! # Architecture
//!
//! ```text
//!  readers (any thread, no lock)          writers (serialized on one mutex)
//!  ─────────────────────────────          ─────────────────────────────────
//!  rules() ── pin epoch ── load ──┐       promote()      in-place rotation
//!                                 │       add_rule()     append / insert / evict
//!                                 ▼       replace_rule() in-place swap or insert
//!                        ┌──────────────┐
//!                        │   RuleSet    │◀── atomic snapshot pointer
//!                        │ [r0, r1, ..] │    (republished on growth)
//!                        └──────────────┘
//! ```
//!
//! # Ordering policy
//!
//! Index 0 is scanned first, so position encodes priority. Three forces keep
//! the sequence useful under the 128-entry cap:
//!
//! - a rule that keeps winning is rotated two slots toward the front per
//!   promotion, climbing in O(log n) successful calls rather than O(n);
//! - a freshly compiled rule lands at the fixed insert position (64), ahead
//!   of long-stagnant entries but behind the proven front;
//! - at capacity, the tail entry (neither recently promoted nor recently
//!   compiled) is the one evicted.
//!
//! # Thread safety
//!
//! `rules()` never blocks: it pins the epoch and loads the snapshot pointer.
//! All mutation goes through one `parking_lot::Mutex` per cache, and every
//! individual slot write is a single atomic pointer store, so readers iterate
//! safely to completion under any concurrent writer activity. See
//! [`crate::set`] for the two visibility contracts and the reclamation story.

use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use parking_lot::Mutex;

use crate::rule::CachedRule;
use crate::set::{RuleSet, Rules};
use crate::stats::CacheStats;

// =============================================================================
// Tuning Constants
// =============================================================================
//
// Policy knobs, not incidental numbers: the eviction and promotion behavior
// (and its tests) are only reproducible with exactly these values.

/// Hard cap on cached rules per site.
pub const MAX_RULES: usize = 128;

/// Fixed index where new rules are inserted once the cache has grown past it.
/// Balances new, likely-hot rules against previously hot rules that have
/// sunk toward the tail.
pub const INSERT_POSITION: usize = MAX_RULES / 2;

/// Promotion search window. A rule on the fast path was found quickly, so it
/// cannot have drifted far from where the caller saw it.
pub const MAX_SEARCH: usize = 8;

/// How far a promoted rule moves toward the front per successful call.
/// Two slots per promotion amortizes repeated wins: a winning rule reaches
/// the front in logarithmically many calls while each call stays three
/// pointer stores cheap.
pub const PROMOTE_SHIFT: usize = 2;

// =============================================================================
// Rule Cache
// =============================================================================

/// Bounded, mutation-safe cache of compiled dispatch rules for one site.
///
/// All operations are total: promoting or replacing a rule the cache no
/// longer holds degrades to a no-op or a plain insert, never an error. The
/// only loss mode is silent eviction at capacity, which is policy: a
/// displaced rule is simply recompiled by the binder on its next miss.
///
/// Rule payloads must be `Send`: a retired rule may be reclaimed from
/// whichever thread advances the epoch.
pub struct RuleCache<T> {
    /// Published rule sequence. Readers load this without locking.
    rules: epoch::Atomic<RuleSet<T>>,
    /// Serializes all structural mutation.
    write_lock: Mutex<()>,
    /// Write-path counters.
    stats: CacheStats,
}

impl<T: Send> RuleCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            rules: epoch::Atomic::new(RuleSet::empty()),
            write_lock: Mutex::new(()),
            stats: CacheStats::new(),
        }
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Snapshot the current rule sequence without taking any lock.
    ///
    /// Safe to call from the dispatch fast path on any number of threads,
    /// concurrently with writers. The snapshot is iterable to completion; a
    /// concurrent promotion may be observed half-applied (one rule briefly
    /// visible in two slots), never as a torn or dangling element.
    #[inline]
    pub fn rules(&self) -> Rules<'_, T> {
        let guard = epoch::pin();
        let set = self.rules.load(Ordering::Acquire, &guard).as_raw();
        Rules::new(guard, set)
    }

    /// Current rule count. Convenience over `rules().len()`.
    #[inline]
    pub fn len(&self) -> usize {
        self.rules().len()
    }

    /// Whether the cache holds no rules.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write-path counters for this cache.
    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Move a recently hit rule toward the front of the sequence.
    ///
    /// Called after `rule` matched while the caller was scanning from
    /// `start_index`. Searches at most [`MAX_SEARCH`] slots forward from
    /// `start_index` for the rule's identity; if found at least
    /// [`PROMOTE_SHIFT`] positions past the window start, rotates it that
    /// many slots toward the front (the two displaced rules each shift back
    /// by one). Anything else, whether the rule drifted out of the window,
    /// was evicted, or is already at the front of the window, is a silent
    /// no-op: promotion is a best-effort heuristic, never a correctness
    /// requirement.
    ///
    /// Never publishes a new sequence instance.
    pub fn promote(&self, rule: &CachedRule<T>, start_index: usize) {
        let wanted = rule as *const CachedRule<T>;
        let guard = epoch::pin();
        let _write = self.write_lock.lock();

        // SAFETY: the published set pointer is never null and cannot be
        // retired while `guard` is pinned.
        let set = unsafe { self.rules.load(Ordering::Acquire, &guard).deref() };
        let end = set.len().min(start_index.saturating_add(MAX_SEARCH));

        let mut found = None;
        for index in start_index..end {
            let rule = set.slots[index].load(Ordering::Acquire, &guard);
            if rule.as_raw() == wanted {
                found = Some((index, rule));
                break;
            }
        }

        let (index, hit) = match found {
            Some(found) => found,
            None => {
                // Concurrently evicted or drifted outside the window.
                self.stats.record_missed_promotion();
                return;
            }
        };
        if index < start_index + PROMOTE_SHIFT {
            // Already at the front of the scan window.
            return;
        }

        // Rotate two slots toward the front. Each store is a single atomic
        // slot replace; a concurrent reader may transiently see `hit` in two
        // slots, never a torn pointer.
        let shift_one = set.slots[index - 1].load(Ordering::Acquire, &guard);
        let shift_two = set.slots[index - 2].load(Ordering::Acquire, &guard);
        set.slots[index].store(shift_one, Ordering::Release);
        set.slots[index - 1].store(shift_two, Ordering::Release);
        set.slots[index - 2].store(hit, Ordering::Release);
        self.stats.record_promotion();
    }

    /// Insert a freshly compiled rule.
    ///
    /// Always succeeds. Consuming the rule by value is what upholds the
    /// no-duplicate-identity invariant: one allocation can only ever be
    /// inserted once. At capacity the tail entry is silently evicted.
    pub fn add_rule(&self, rule: CachedRule<T>) {
        let guard = epoch::pin();
        let _write = self.write_lock.lock();
        let rule = Owned::new(rule).into_shared(&guard);
        self.insert_or_grow(rule, &guard);
        self.stats.record_insert();
    }

    /// Swap a permanently failed rule for its recompiled replacement.
    ///
    /// Scans the entire current sequence for `old`'s identity and overwrites
    /// its slot in place (no resize, no reordering) so the replacement
    /// inherits the position the old rule had earned. If `old` is already
    /// gone (evicted by growth or truncation), falls back to a plain insert:
    /// the caller must never be left without its replacement just because
    /// the original slot disappeared.
    pub fn replace_rule(&self, old: &CachedRule<T>, new: CachedRule<T>) {
        let wanted = old as *const CachedRule<T>;
        let guard = epoch::pin();
        let _write = self.write_lock.lock();

        // SAFETY: as in `promote`.
        let set = unsafe { self.rules.load(Ordering::Acquire, &guard).deref() };
        let new = Owned::new(new).into_shared(&guard);

        for slot in set.slots.iter() {
            let rule = slot.load(Ordering::Acquire, &guard);
            if rule.as_raw() == wanted {
                slot.store(new, Ordering::Release);
                // SAFETY: `rule` is now unlinked from every slot; in-flight
                // readers keep it alive through their pinned guards.
                unsafe { guard.defer_destroy(rule) };
                self.stats.record_replacement();
                return;
            }
        }

        log::debug!("replacement target already evicted, inserting instead");
        self.insert_or_grow(new, &guard);
        self.stats.record_fallback_insert();
    }

    // =========================================================================
    // Insert-or-Grow
    // =========================================================================

    /// Shared insertion algorithm for `add_rule` and the `replace_rule`
    /// fallback. Caller must hold the write lock; `rule` must be a fresh,
    /// unlinked allocation.
    fn insert_or_grow<'g>(&self, rule: Shared<'g, CachedRule<T>>, guard: &'g Guard) {
        let current = self.rules.load(Ordering::Acquire, guard);
        // SAFETY: as in `promote`.
        let set = unsafe { current.deref() };
        let len = set.len();

        if len < INSERT_POSITION {
            // Young cache: order does not carry signal yet, append at the
            // tail of a new sequence.
            let next = RuleSet::with_len(len + 1);
            for (index, slot) in set.slots.iter().enumerate() {
                next.slots[index].store(slot.load(Ordering::Acquire, guard), Ordering::Relaxed);
            }
            next.slots[len].store(rule, Ordering::Relaxed);
            self.publish(next, current, guard);
            return;
        }

        if len < MAX_RULES {
            // Grown cache with room: the new rule lands exactly at the
            // insert position of a new sequence, pushing the mid-tail back.
            let next = RuleSet::with_len(len + 1);
            for index in 0..INSERT_POSITION {
                next.slots[index]
                    .store(set.slots[index].load(Ordering::Acquire, guard), Ordering::Relaxed);
            }
            next.slots[INSERT_POSITION].store(rule, Ordering::Relaxed);
            for index in INSERT_POSITION..len {
                next.slots[index + 1]
                    .store(set.slots[index].load(Ordering::Acquire, guard), Ordering::Relaxed);
            }
            self.publish(next, current, guard);
            return;
        }

        // At capacity: reuse the existing storage. Shift tail-to-head so
        // each rule moves back exactly one slot, place the new rule at the
        // insert position, and evict the old tail. Readers scanning
        // concurrently may see one rule in two adjacent slots mid-shift.
        let evicted = set.slots[MAX_RULES - 1].load(Ordering::Acquire, guard);
        for index in (INSERT_POSITION + 1..MAX_RULES).rev() {
            let shifted = set.slots[index - 1].load(Ordering::Acquire, guard);
            set.slots[index].store(shifted, Ordering::Release);
        }
        set.slots[INSERT_POSITION].store(rule, Ordering::Release);
        // SAFETY: `evicted` is now unlinked from every slot; in-flight
        // readers keep it alive through their pinned guards.
        unsafe { guard.defer_destroy(evicted) };
        self.stats.record_eviction();
        log::trace!("rule cache at capacity, evicted tail rule");
    }

    /// Swap in a newly built sequence and retire the superseded one.
    fn publish<'g>(&self, next: RuleSet<T>, current: Shared<'g, RuleSet<T>>, guard: &'g Guard) {
        self.rules.store(Owned::new(next), Ordering::Release);
        // SAFETY: `current` is unreachable to new readers; it still backs
        // in-flight snapshots until their guards unpin. Dropping a RuleSet
        // frees only the slot array, never the rules it points to.
        unsafe { guard.defer_destroy(current) };
    }
}

impl<T: Send> Default for RuleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RuleCache<T> {
    fn drop(&mut self) {
        // Exclusive access: snapshots borrow the cache, so none can be live,
        // and no writer holds the lock.
        // SAFETY: with no concurrent accessors the unprotected guard is
        // sound. Every rule in the current set is owned exactly once here;
        // rules retired earlier were unlinked from these slots when they
        // were retired.
        unsafe {
            let guard = epoch::unprotected();
            let set = self.rules.load(Ordering::Relaxed, guard);
            if set.is_null() {
                return;
            }
            for slot in set.deref().slots.iter() {
                let rule = slot.load(Ordering::Relaxed, guard);
                if !rule.is_null() {
                    drop(rule.into_owned());
                }
            }
            drop(set.into_owned());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
