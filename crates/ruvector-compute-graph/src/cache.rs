//! Graph-level result cache with pluggable eviction
//!
//! The cache is a bounded set of computed values keyed by their
//! fingerprint: it records that *some* node produced a value, independent
//! of which node (per-node memoization lives in each node's
//! [`PrecisionStore`](crate::PrecisionStore)). Eviction is a tagged
//! variant: LRU tracks recency, LFU tracks frequency with deterministic
//! ties (lowest fingerprint evicted).

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::value::GraphValue;

/// Hit/miss/eviction counters for a [`ResultCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries evicted to make room
    pub evictions: u64,
}

/// Recency state for LRU eviction: most recent at the front.
#[derive(Debug, Clone, Default)]
struct LruState {
    order: VecDeque<u64>,
}

/// Frequency state for LFU eviction.
#[derive(Debug, Clone, Default)]
struct LfuState {
    frequencies: FxHashMap<u64, u64>,
}

#[derive(Debug, Clone)]
enum PolicyState {
    Lru(LruState),
    Lfu(LfuState),
}

/// Eviction policy for the graph result cache: LRU or LFU with a fixed
/// capacity.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    capacity: usize,
    state: PolicyState,
}

impl EvictionPolicy {
    /// Least-recently-used policy with the given capacity.
    pub fn lru(capacity: usize) -> Self {
        Self {
            capacity,
            state: PolicyState::Lru(LruState::default()),
        }
    }

    /// Least-frequently-used policy with the given capacity.
    pub fn lfu(capacity: usize) -> Self {
        Self {
            capacity,
            state: PolicyState::Lfu(LfuState::default()),
        }
    }

    /// Maximum entries the policy admits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether this is an LRU policy (as opposed to LFU).
    pub fn is_lru(&self) -> bool {
        matches!(self.state, PolicyState::Lru(_))
    }

    fn tracked(&self) -> usize {
        match &self.state {
            PolicyState::Lru(state) => state.order.len(),
            PolicyState::Lfu(state) => state.frequencies.len(),
        }
    }

    fn should_cache(&self) -> bool {
        self.tracked() < self.capacity
    }

    fn on_access(&mut self, key: u64) {
        match &mut self.state {
            PolicyState::Lru(state) => {
                if let Some(pos) = state.order.iter().position(|&k| k == key) {
                    state.order.remove(pos);
                    state.order.push_front(key);
                }
            }
            PolicyState::Lfu(state) => {
                if let Some(count) = state.frequencies.get_mut(&key) {
                    *count += 1;
                }
            }
        }
    }

    fn on_insert(&mut self, key: u64) {
        match &mut self.state {
            PolicyState::Lru(state) => state.order.push_front(key),
            PolicyState::Lfu(state) => {
                state.frequencies.insert(key, 1);
            }
        }
    }

    fn select_victim(&mut self) -> Option<u64> {
        match &mut self.state {
            PolicyState::Lru(state) => state.order.pop_back(),
            PolicyState::Lfu(state) => {
                // Minimum frequency; ties broken by lowest fingerprint.
                let victim = state
                    .frequencies
                    .iter()
                    .min_by_key(|(&key, &count)| (count, key))
                    .map(|(&key, _)| key)?;
                state.frequencies.remove(&victim);
                Some(victim)
            }
        }
    }

    /// Fresh policy of the same kind and capacity, with no tracked state.
    fn reset(&self) -> Self {
        match self.state {
            PolicyState::Lru(_) => Self::lru(self.capacity),
            PolicyState::Lfu(_) => Self::lfu(self.capacity),
        }
    }
}

/// Bounded set of computed results with policy-driven eviction
#[derive(Debug)]
pub struct ResultCache<V> {
    entries: FxHashMap<u64, V>,
    policy: EvictionPolicy,
    stats: CacheStats,
}

impl<V: GraphValue> ResultCache<V> {
    /// Create a cache governed by `policy`.
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: FxHashMap::default(),
            policy,
            stats: CacheStats::default(),
        }
    }

    /// Record a computed value. Returns `true` if the value was newly
    /// inserted, `false` if it was already present (counted as a hit and
    /// reported to the policy as an access) or the policy has no room to
    /// make (zero capacity).
    pub fn insert(&mut self, value: &V) -> bool {
        let key = value.fingerprint();

        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
            self.policy.on_access(key);
            return false;
        }

        self.stats.misses += 1;
        if !self.policy.should_cache() {
            let Some(victim) = self.policy.select_victim() else {
                return false; // No entries to evict, so no room to make.
            };
            self.entries.remove(&victim);
            self.stats.evictions += 1;
        }
        self.policy.on_insert(key);
        self.entries.insert(key, value.clone());
        true
    }

    /// Whether an equal value has been recorded. Counts toward stats and
    /// policy recency/frequency.
    pub fn contains(&mut self, value: &V) -> bool {
        let key = value.fingerprint();
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
            self.policy.on_access(key);
            true
        } else {
            self.stats.misses += 1;
            false
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries.
    pub fn capacity(&self) -> usize {
        self.policy.capacity()
    }

    /// Hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop all entries and reset policy state; stats are preserved.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.policy = self.policy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_never_exceeded() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lru(3));
        for v in 0..10u64 {
            cache.insert(&v);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 7);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lru(3));
        cache.insert(&1);
        cache.insert(&2);
        cache.insert(&3);

        // Touch 1 so 2 becomes the coldest.
        assert!(cache.contains(&1));
        cache.insert(&4);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
    }

    #[test]
    fn test_lfu_evicts_minimum_frequency() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lfu(3));
        cache.insert(&1);
        cache.insert(&2);
        cache.insert(&3);

        // 1 and 3 gain frequency; 2 stays at 1.
        cache.contains(&1);
        cache.contains(&3);
        cache.insert(&4);

        assert!(!cache.contains(&2));
        assert!(cache.contains(&1));
        assert!(cache.contains(&3));
    }

    #[test]
    fn test_lfu_tie_break_is_deterministic() {
        let values: Vec<u64> = vec![10, 20, 30];
        let min_fp = values
            .iter()
            .map(|v| v.fingerprint())
            .min()
            .unwrap();

        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lfu(3));
        for v in &values {
            cache.insert(v);
        }
        // All frequencies equal; the lowest fingerprint goes.
        cache.insert(&40);

        let evicted = values
            .iter()
            .find(|v| v.fingerprint() == min_fp)
            .copied()
            .unwrap();
        assert!(!cache.contains(&evicted));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lru(0));
        assert!(!cache.insert(&1));
        assert!(cache.is_empty());
        assert!(!cache.contains(&1));

        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lfu(0));
        assert!(!cache.insert(&1));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_duplicate_insert_is_a_hit() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lru(4));
        assert!(cache.insert(&7));
        assert!(!cache.insert(&7));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_clear_resets_contents_not_stats() {
        let mut cache: ResultCache<u64> = ResultCache::new(EvictionPolicy::lfu(2));
        cache.insert(&1);
        cache.insert(&2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 2);

        // Policy state was reset too; fresh inserts behave as on a new cache.
        cache.insert(&3);
        cache.insert(&4);
        assert_eq!(cache.len(), 2);
    }
}
