//! # RuVector Compute Graph
//!
//! Precision-aware computation DAGs with parallel execution.
//!
//! This crate provides:
//! - Typed computation graphs with cycle rejection and topology
//!   introspection
//! - Per-node multi-level precision stores with pending-update merging
//!   and inter-level compression
//! - A graph-level result cache with LRU/LFU eviction
//! - A worker-pool scheduler with dependency ordering, at-most-once
//!   execution, and error propagation to downstream nodes
//! - Graph-rewrite optimization passes: dead-node elimination, linear
//!   chain fusion, precision propagation, memory-aware compression
//!
//! # Quick start
//!
//! ```
//! use ruvector_compute_graph::{Edge, Graph, Node};
//!
//! let mut graph: Graph<f64> = Graph::new();
//! let source = Node::from_fn("source", |_level| Ok(21.0));
//! let double = Node::from_fn("double", |_level| Ok(42.0));
//! graph.add_node(source.clone()).unwrap();
//! graph.add_node(double.clone()).unwrap();
//! graph.add_edge(Edge::new(source, double.clone())).unwrap();
//!
//! graph.execute().unwrap();
//! assert_eq!(double.compute(0).unwrap(), 42.0);
//! ```

#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod config;
pub mod edge;
pub mod error;
pub mod graph;
pub mod node;
pub mod optimize;
pub mod pool;
mod scheduler;
pub mod store;
pub mod value;

// Re-exports for convenience
pub use cache::{CacheStats, EvictionPolicy, ResultCache};
pub use config::{
    CachePolicyKind, CompressionPassConfig, GraphConfig, PrecisionPassConfig, StoreConfig,
};
pub use edge::Edge;
pub use error::{ComputeError, ErrorKind, ErrorRecord, Result};
pub use graph::Graph;
pub use node::{Node, NodeOp};
pub use optimize::{
    DeadNodeElimination, LinearChainFusion, MemoryAwareCompression, OptimizationPass,
    PrecisionPropagation,
};
pub use pool::{JobHandle, WorkerPool};
pub use store::PrecisionStore;
pub use value::GraphValue;

/// Version of the compute graph library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
