//! Behavioral properties of the rule cache.
//!
//! Coverage:
//! - Capacity growth: tail append, fixed-position insert, eviction at cap
//! - Promotion: bounded window, two-slot rotation, no-op outside the window
//! - Replacement: in-place swap, insert fallback when the slot is gone

use rulecache::{CachedRule, RuleCache, INSERT_POSITION, MAX_RULES};

fn fill(cache: &RuleCache<usize>, count: usize) {
    for value in 0..count {
        cache.add_rule(CachedRule::new(value));
    }
}

fn targets(cache: &RuleCache<usize>) -> Vec<usize> {
    cache.rules().iter().map(|rule| *rule.target()).collect()
}

// =============================================================================
// Growth and Presence
// =============================================================================

#[test]
fn test_distinct_inserts_all_present() {
    for count in [1, 5, INSERT_POSITION, INSERT_POSITION + 1, 100, MAX_RULES] {
        let cache = RuleCache::new();
        fill(&cache, count);

        let rules = cache.rules();
        assert_eq!(rules.len(), count, "count {}", count);
        let mut seen: Vec<usize> = rules.iter().map(|rule| *rule.target()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>(), "count {}", count);
    }
}

#[test]
fn test_young_cache_appends_in_insertion_order() {
    let cache = RuleCache::new();
    cache.add_rule(CachedRule::new(10usize));
    assert_eq!(targets(&cache), vec![10]);
    cache.add_rule(CachedRule::new(11usize));
    assert_eq!(targets(&cache), vec![10, 11]);

    fill(&cache, 5);
    assert_eq!(targets(&cache), vec![10, 11, 0, 1, 2, 3, 4]);
}

#[test]
fn test_insert_lands_at_fixed_position_after_growth() {
    let cache = RuleCache::new();
    // 64 inserts all take the tail-append path.
    fill(&cache, INSERT_POSITION);
    assert_eq!(targets(&cache), (0..INSERT_POSITION).collect::<Vec<_>>());

    // The next insert lands at index 64 exactly, disturbing nothing before.
    cache.add_rule(CachedRule::new(1000usize));
    let after = targets(&cache);
    assert_eq!(&after[..INSERT_POSITION], &(0..INSERT_POSITION).collect::<Vec<_>>()[..]);
    assert_eq!(after[INSERT_POSITION], 1000);

    // And the one after that pushes the former index-64 element to 65.
    cache.add_rule(CachedRule::new(2000usize));
    let after = targets(&cache);
    assert_eq!(after[INSERT_POSITION], 2000);
    assert_eq!(after[INSERT_POSITION + 1], 1000);
    assert_eq!(&after[..INSERT_POSITION], &(0..INSERT_POSITION).collect::<Vec<_>>()[..]);
}

#[test]
fn test_capacity_insert_evicts_exactly_the_tail() {
    let cache = RuleCache::new();
    fill(&cache, MAX_RULES);
    let before = targets(&cache);
    let tail = before[MAX_RULES - 1];

    cache.add_rule(CachedRule::new(5000usize));

    let after = targets(&cache);
    assert_eq!(after.len(), MAX_RULES);
    assert!(!after.contains(&tail), "tail should be evicted");
    // Every survivor keeps its relative order.
    assert_eq!(&after[..INSERT_POSITION], &before[..INSERT_POSITION]);
    assert_eq!(after[INSERT_POSITION], 5000);
    assert_eq!(
        &after[INSERT_POSITION + 1..],
        &before[INSERT_POSITION..MAX_RULES - 1]
    );
    assert_eq!(cache.stats().snapshot().evictions, 1);
}

#[test]
fn test_sustained_churn_stays_bounded() {
    let cache = RuleCache::new();
    fill(&cache, 4 * MAX_RULES);

    assert_eq!(cache.len(), MAX_RULES);
    let snapshot = cache.stats().snapshot();
    assert_eq!(snapshot.inserts, 4 * MAX_RULES as u64);
    assert_eq!(snapshot.evictions, 3 * MAX_RULES as u64);
    // The front half is insulated from churn once the cache is full.
    let front = &targets(&cache)[..INSERT_POSITION];
    assert_eq!(front, &(0..INSERT_POSITION).collect::<Vec<_>>()[..]);
}

// =============================================================================
// Promotion
// =============================================================================

#[test]
fn test_promote_rotates_two_toward_front() {
    let cache = RuleCache::new();
    fill(&cache, 16);

    let rules = cache.rules();
    let rule = rules.get(9).unwrap();
    cache.promote(rule, 5);
    drop(rules);

    // Found at j = 9 scanning from 5: moves to 7, displacing 7 and 8 back.
    assert_eq!(
        targets(&cache),
        vec![0, 1, 2, 3, 4, 5, 6, 9, 7, 8, 10, 11, 12, 13, 14, 15]
    );
}

#[test]
fn test_promote_outside_window_leaves_cache_untouched() {
    let cache = RuleCache::new();
    fill(&cache, 32);
    let before = targets(&cache);

    // Index 20 is beyond the window [4, 12).
    let rules = cache.rules();
    let rule = rules.get(20).unwrap();
    cache.promote(rule, 4);
    drop(rules);

    assert_eq!(targets(&cache), before);
    assert_eq!(cache.stats().snapshot().promotions, 0);
}

#[test]
fn test_promote_evicted_rule_is_silent() {
    let cache = RuleCache::new();
    fill(&cache, MAX_RULES);

    // Hold a reference to the tail, evict it, then try to promote it.
    let rules = cache.rules();
    let doomed = rules.get(MAX_RULES - 1).unwrap();
    cache.add_rule(CachedRule::new(5000usize));
    cache.promote(doomed, MAX_RULES - 8);
    drop(rules);

    assert_eq!(cache.len(), MAX_RULES);
    assert_eq!(cache.stats().snapshot().promotions, 0);
}

// =============================================================================
// Replacement
// =============================================================================

#[test]
fn test_replace_present_swaps_slot_only() {
    let cache = RuleCache::new();
    fill(&cache, 10);

    let rules = cache.rules();
    let stale = rules.get(6).unwrap();
    cache.replace_rule(stale, CachedRule::new(600usize));
    drop(rules);

    let after = targets(&cache);
    assert_eq!(after.len(), 10);
    assert_eq!(after[6], 600);
    assert_eq!(after[..6], [0, 1, 2, 3, 4, 5]);
    assert_eq!(after[7..], [7, 8, 9]);
}

#[test]
fn test_replace_absent_behaves_like_add() {
    let replaced = RuleCache::new();
    let added = RuleCache::new();
    fill(&replaced, 70);
    fill(&added, 70);

    let detached = CachedRule::new(999usize);
    replaced.replace_rule(&detached, CachedRule::new(777usize));
    added.add_rule(CachedRule::new(777usize));

    assert_eq!(targets(&replaced), targets(&added));
}

#[test]
fn test_replace_after_eviction_falls_back_to_insert() {
    let cache = RuleCache::new();
    fill(&cache, MAX_RULES);

    let rules = cache.rules();
    let doomed = rules.get(MAX_RULES - 1).unwrap();
    cache.add_rule(CachedRule::new(5000usize));

    // The stale rule was just evicted; its replacement must still land.
    cache.replace_rule(doomed, CachedRule::new(6000usize));
    drop(rules);

    assert_eq!(cache.len(), MAX_RULES);
    assert_eq!(targets(&cache)[INSERT_POSITION], 6000);
    assert_eq!(cache.stats().snapshot().fallback_inserts, 1);
}
