//! Per-site cache registry.
//!
//! One `RuleCache` serves one dispatch site; the registry is where sites
//! find theirs. Keyed by code id + bytecode offset, the same way IC sites
//! are identified, so an operation family sharing a result shape can also
//! share a key (and therefore a cache).

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::cache::RuleCache;
use crate::stats::CacheStatsSnapshot;

// =============================================================================
// Site Identifier
// =============================================================================

/// Unique identifier for a dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiteId {
    /// The code object containing the site.
    pub code_id: u64,
    /// Bytecode offset of the dispatching instruction.
    pub bc_offset: u32,
}

impl SiteId {
    /// Create a new site identifier.
    #[inline]
    pub const fn new(code_id: u64, bc_offset: u32) -> Self {
        Self { code_id, bc_offset }
    }
}

// =============================================================================
// Site Registry
// =============================================================================

/// Concurrent map from dispatch sites to their shared rule caches.
pub struct SiteRegistry<T> {
    caches: DashMap<SiteId, Arc<RuleCache<T>>, FxBuildHasher>,
}

impl<T: Send> SiteRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            caches: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// The cache for `site`, created empty on first use.
    pub fn cache_for(&self, site: SiteId) -> Arc<RuleCache<T>> {
        self.caches
            .entry(site)
            .or_insert_with(|| Arc::new(RuleCache::new()))
            .value()
            .clone()
    }

    /// The cache for `site`, if the site has dispatched before.
    pub fn get(&self, site: SiteId) -> Option<Arc<RuleCache<T>>> {
        self.caches.get(&site).map(|entry| entry.value().clone())
    }

    /// Number of sites with a cache.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no site has dispatched yet.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Drop every cache. Sites re-create theirs on next use; rules are
    /// recompiled on their next miss.
    pub fn clear(&self) {
        self.caches.clear();
    }

    /// Sum of all per-cache write-path counters.
    pub fn aggregate_stats(&self) -> CacheStatsSnapshot {
        let mut total = CacheStatsSnapshot::default();
        for entry in self.caches.iter() {
            total.merge(&entry.value().stats().snapshot());
        }
        total
    }
}

impl<T: Send> Default for SiteRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
