//! Precision-aware value store
//!
//! Each node owns one [`PrecisionStore`]: a multi-level cache indexed by
//! precision level. Writes land as weighted pending updates; merging folds
//! them into a single absolute per level (weighted average, then an
//! exponential moving average against the previous absolute). Reads fall
//! through to the nearest lower level, re-quantized onto the requested
//! grid. Adjacent absolutes that agree within the compression threshold
//! are collapsed into the lower level.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::StoreConfig;
use crate::value::GraphValue;

/// Weight applied to freshly merged values when folding into an existing
/// absolute.
const EMA_WEIGHT: f64 = 0.3;

/// A pending write awaiting a merge
#[derive(Debug, Clone)]
struct PendingUpdate<V> {
    value: V,
    weight: f64,
}

#[derive(Debug)]
struct StoreInner<V> {
    absolutes: FxHashMap<usize, V>,
    pending: FxHashMap<usize, Vec<PendingUpdate<V>>>,
}

/// Per-node multi-level value cache with pending-update merging and
/// inter-level compression.
///
/// All methods take `&self`; a single internal mutex serializes access and
/// callers receive owned copies. No method fails: out-of-range levels are
/// clamped, and reads on an empty store return `None`.
#[derive(Debug)]
pub struct PrecisionStore<V> {
    config: StoreConfig,
    inner: Mutex<StoreInner<V>>,
}

impl<V: GraphValue> PrecisionStore<V> {
    /// Create a store accepting levels `0..=max_depth`.
    pub fn new(max_depth: usize, compression_threshold: f64) -> Self {
        Self::with_config(StoreConfig {
            max_depth,
            compression_threshold,
            ..StoreConfig::default()
        })
    }

    /// Create a store from a full configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner {
                absolutes: FxHashMap::default(),
                pending: FxHashMap::default(),
            }),
        }
    }

    /// Queue `value` as a pending update at `level` (clamped to
    /// `max_depth`). Reaching the merge threshold triggers an automatic
    /// merge of that level.
    pub fn store(&self, value: V, level: usize) {
        let level = level.min(self.config.max_depth);
        let mut inner = self.inner.lock();

        let updates = inner.pending.entry(level).or_default();
        updates.push(PendingUpdate { value, weight: 1.0 });

        if updates.len() >= self.config.merge_threshold {
            Self::merge_level(&mut inner, level);
        }
    }

    /// Read the value at `level` (clamped), falling through to the nearest
    /// lower populated level and re-quantizing it onto the requested grid.
    ///
    /// Reads observe pending updates as if they were already merged; the
    /// merge only becomes durable via [`merge_all`](Self::merge_all) or the
    /// automatic threshold merge.
    pub fn get(&self, level: usize) -> Option<V> {
        let level = level.min(self.config.max_depth);
        let inner = self.inner.lock();

        if let Some(value) = Self::preview_level(&inner, level) {
            return Some(value);
        }

        for lower in (0..level).rev() {
            if let Some(value) = Self::preview_level(&inner, lower) {
                return Some(value.quantize(lower, level));
            }
        }

        None
    }

    /// Merge every level with pending updates, then compress redundant
    /// levels.
    pub fn merge_all(&self) {
        let mut inner = self.inner.lock();

        let mut levels: Vec<usize> = inner
            .pending
            .iter()
            .filter(|(_, updates)| !updates.is_empty())
            .map(|(&level, _)| level)
            .collect();
        levels.sort_unstable();

        for level in levels {
            Self::merge_level(&mut inner, level);
        }

        Self::compress_tree(&mut inner, self.config.compression_threshold);
    }

    /// Deepest level the store accepts.
    pub fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    /// Number of levels currently holding an absolute.
    pub fn level_count(&self) -> usize {
        self.inner.lock().absolutes.len()
    }

    /// Sorted list of levels currently holding an absolute.
    pub fn levels(&self) -> Vec<usize> {
        let mut levels: Vec<usize> = self.inner.lock().absolutes.keys().copied().collect();
        levels.sort_unstable();
        levels
    }

    /// Total pending updates across all levels.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.values().map(Vec::len).sum()
    }

    /// The value a merge of `level` would produce right now: pending
    /// updates reduced to a weighted average, folded into the existing
    /// absolute. `None` when the level holds neither.
    fn preview_level(inner: &StoreInner<V>, level: usize) -> Option<V> {
        let absolute = inner.absolutes.get(&level);
        let pending = inner.pending.get(&level).filter(|u| !u.is_empty());

        match (absolute, pending) {
            (Some(value), None) => Some(value.clone()),
            (absolute, Some(updates)) => {
                let merged = Self::weighted_average(updates);
                Some(match absolute {
                    Some(existing) => existing.blend(&merged, EMA_WEIGHT),
                    None => merged,
                })
            }
            (None, None) => None,
        }
    }

    fn weighted_average(updates: &[PendingUpdate<V>]) -> V {
        let mut merged = updates[0].value.clone();
        let mut total_weight = updates[0].weight;
        for update in &updates[1..] {
            let share = update.weight / (total_weight + update.weight);
            merged = merged.blend(&update.value, share);
            total_weight += update.weight;
        }
        merged
    }

    /// Reduce the pending list at `level` to a weighted average and fold
    /// it into the level's absolute.
    fn merge_level(inner: &mut StoreInner<V>, level: usize) {
        let Some(merged) = inner
            .pending
            .get(&level)
            .filter(|u| !u.is_empty())
            .map(|u| Self::weighted_average(u))
        else {
            return;
        };

        if let Some(updates) = inner.pending.get_mut(&level) {
            updates.clear();
        }

        match inner.absolutes.get(&level) {
            Some(existing) => {
                let folded = existing.blend(&merged, EMA_WEIGHT);
                inner.absolutes.insert(level, folded);
            }
            None => {
                inner.absolutes.insert(level, merged);
            }
        }
    }

    /// Drop every level whose absolute is within `threshold` of the next
    /// lower absolute. Candidates are selected against the pre-removal
    /// state in a single scan.
    fn compress_tree(inner: &mut StoreInner<V>, threshold: f64) {
        let mut to_remove: Vec<usize> = inner
            .absolutes
            .iter()
            .filter(|(&level, value)| {
                level > 0
                    && inner
                        .absolutes
                        .get(&(level - 1))
                        .is_some_and(|lower| value.distance(lower) < threshold)
            })
            .map(|(&level, _)| level)
            .collect();
        to_remove.sort_unstable();

        for level in to_remove {
            inner.absolutes.remove(&level);
        }
    }
}
