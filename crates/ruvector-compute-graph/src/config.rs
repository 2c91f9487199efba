//! Configuration for graphs, stores, and optimization passes

use serde::{Deserialize, Serialize};

/// Eviction policy selection for [`GraphConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicyKind {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
}

/// Configuration for a [`Graph`](crate::Graph)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Worker threads for parallel execution (0 = hardware concurrency)
    pub worker_threads: usize,
    /// Result cache capacity in entries
    pub cache_capacity: usize,
    /// Result cache eviction policy
    pub cache_policy: CachePolicyKind,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0, // Auto-detect
            cache_capacity: 64,
            cache_policy: CachePolicyKind::Lru,
        }
    }
}

/// Configuration for a [`PrecisionStore`](crate::PrecisionStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deepest precision level the store accepts
    pub max_depth: usize,
    /// Levels whose absolutes differ less than this are collapsed
    pub compression_threshold: f64,
    /// Pending updates per level before an automatic merge
    pub merge_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            compression_threshold: 1e-3,
            merge_threshold: 10,
        }
    }
}

/// Configuration for the precision propagation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecisionPassConfig {
    /// Estimated dependency error above this bumps the requirement by 1;
    /// below half of it drops the requirement by 1.
    pub error_threshold: f64,
}

impl Default for PrecisionPassConfig {
    fn default() -> Self {
        Self {
            error_threshold: 1e-3,
        }
    }
}

/// Configuration for the memory-aware compression pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionPassConfig {
    /// Aggregate usage ratio that triggers compression
    pub memory_threshold: f64,
    /// Nodes below this fraction of mean activity are compressed
    pub activity_threshold: f64,
    /// Memory budget per node in bytes
    pub node_memory_budget: usize,
}

impl Default for CompressionPassConfig {
    fn default() -> Self {
        Self {
            memory_threshold: 0.8,
            activity_threshold: 0.2,
            node_memory_budget: 1024 * 1024,
        }
    }
}
