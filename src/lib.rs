//! Per-call-site dispatch rule cache.
//!
//! A dynamic dispatch site that keeps resolving the same operation shapes
//! should not re-run binding for every call. This crate caches the compiled
//! specializations ("rules") a site has already produced, in priority order,
//! behind a read path that never takes a lock:
//!
//! - [`RuleCache`]: the per-site cache with lock-free snapshot reads and one
//!   exclusive writer lock for promote/insert/replace.
//! - [`CachedRule`]: an opaque compiled rule; the cache compares rules only
//!   by heap identity and never looks inside.
//! - [`DispatchSite`]: the caller-side driver (scan, guard-test, promote on
//!   hit, compile and insert on miss).
//! - [`SiteRegistry`]: maps dispatch-site ids to their shared caches.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod registry;
pub mod rule;
pub mod set;
pub mod site;
pub mod stats;

pub use cache::{RuleCache, INSERT_POSITION, MAX_RULES, MAX_SEARCH, PROMOTE_SHIFT};
pub use registry::{SiteId, SiteRegistry};
pub use rule::CachedRule;
pub use set::Rules;
pub use site::{Binder, DispatchSite};
pub use stats::{CacheStats, CacheStatsSnapshot};
