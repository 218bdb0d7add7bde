//! Cached dispatch rules.
//!
//! A rule is whatever the binder compiled for one observed operation shape:
//! an executable target plus the guard state the binder attached to it. The
//! cache never inspects or mutates that payload; it only repositions rule
//! slots and compares rules by identity.

/// One compiled specialization held by a [`RuleCache`](crate::RuleCache).
///
/// Immutable once constructed. The wrapper exists to give every compiled
/// rule a stable heap identity: two rules are never logically equal by
/// content, only by being the same allocation, so all cache lookups compare
/// addresses rather than values.
#[derive(Debug)]
pub struct CachedRule<T> {
    /// The binder's payload: the executable target together with whatever
    /// guard state was compiled alongside it.
    target: T,
}

impl<T> CachedRule<T> {
    /// Wrap a freshly compiled specialization.
    #[inline]
    pub fn new(target: T) -> Self {
        Self { target }
    }

    /// The compiled target this rule dispatches to.
    #[inline]
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Unwrap the payload, discarding the cache identity.
    #[inline]
    pub fn into_target(self) -> T {
        self.target
    }
}
