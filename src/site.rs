//! Dispatch-site driver.
//!
//! The cache itself never decides whether a rule applies; that is the
//! binder's guard. This module is the caller side of the contract: scan the
//! current rules in priority order, test each guard, promote on a hit,
//! compile and insert on a total miss.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{RuleCache, PROMOTE_SHIFT};
use crate::rule::CachedRule;

// =============================================================================
// Binder Boundary
// =============================================================================

/// The binder/compiler collaborator consumed by a dispatch site.
///
/// `matches` is the guard: does a previously compiled target still apply to
/// these arguments? `compile` produces a fresh specialization on a miss.
/// Both are opaque to the cache; only the site driver calls them.
pub trait Binder {
    /// Compiled specialization type stored in the cache.
    type Target;
    /// Argument shape a call presents.
    type Args;

    /// Test whether a cached target still applies to `args`.
    fn matches(&self, target: &Self::Target, args: &Self::Args) -> bool;

    /// Compile a new specialization for `args`.
    fn compile(&self, args: &Self::Args) -> Self::Target;
}

// =============================================================================
// Dispatch Site
// =============================================================================

/// One dynamic dispatch site: a rule cache paired with its binder.
pub struct DispatchSite<B: Binder> {
    cache: RuleCache<B::Target>,
    binder: B,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<B: Binder> DispatchSite<B>
where
    B::Target: Send,
{
    /// Create a site with an empty cache.
    pub fn new(binder: B) -> Self {
        Self {
            cache: RuleCache::new(),
            binder,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The underlying rule cache.
    #[inline]
    pub fn cache(&self) -> &RuleCache<B::Target> {
        &self.cache
    }

    /// The binder this site compiles through.
    #[inline]
    pub fn binder(&self) -> &B {
        &self.binder
    }

    /// Resolve `args` to a target and run `use_target` on it.
    ///
    /// Scans the current snapshot in priority order. On a hit the rule is
    /// promoted when it sits at least [`PROMOTE_SHIFT`] slots deep; rules
    /// already at the front have nothing to gain. On a total miss the binder
    /// compiles a new rule, the caller uses it, and it is inserted for
    /// future calls.
    pub fn resolve_with<R>(
        &self,
        args: &B::Args,
        use_target: impl FnOnce(&B::Target) -> R,
    ) -> R {
        let rules = self.cache.rules();
        for (index, rule) in rules.iter().enumerate() {
            if self.binder.matches(rule.target(), args) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if index >= PROMOTE_SHIFT {
                    self.cache.promote(rule, index - PROMOTE_SHIFT);
                }
                return use_target(rule.target());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let rule = CachedRule::new(self.binder.compile(args));
        let result = use_target(rule.target());
        self.cache.add_rule(rule);
        result
    }

    /// Swap a permanently failed rule for a recompiled one and use it.
    ///
    /// For the case where a guard will never pass again (the world changed
    /// under it): the replacement takes the stale rule's exact slot, or is
    /// inserted fresh when that slot is already gone.
    pub fn invalidate_with<R>(
        &self,
        stale: &CachedRule<B::Target>,
        args: &B::Args,
        use_target: impl FnOnce(&B::Target) -> R,
    ) -> R {
        let rule = CachedRule::new(self.binder.compile(args));
        let result = use_target(rule.target());
        self.cache.replace_rule(stale, rule);
        result
    }

    /// Fraction of resolves served from the cache, 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Raw (hits, misses) counters.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
