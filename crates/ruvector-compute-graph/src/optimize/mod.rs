//! Graph-rewrite optimization passes
//!
//! Passes run in registration order at the start of every execution, each
//! taking the graph by exclusive reference. Every pass preserves
//! acyclicity and node/edge consistency, and touches nodes only through
//! the graph's introspection API and the nodes' public surface.

mod compression;
mod dead_node;
mod fusion;
mod precision;

pub use compression::MemoryAwareCompression;
pub use dead_node::DeadNodeElimination;
pub use fusion::{FusedChainOp, LinearChainFusion};
pub use precision::PrecisionPropagation;

use crate::graph::Graph;

/// A graph rewrite applied before scheduling.
pub trait OptimizationPass<V>: Send + Sync {
    /// Pass name for diagnostics.
    fn name(&self) -> &'static str;

    /// Rewrite the graph in place.
    fn run(&self, graph: &mut Graph<V>);
}
