//! Dead-node elimination

use rustc_hash::FxHashSet;
use tracing::debug;

use super::OptimizationPass;
use crate::graph::Graph;
use crate::value::GraphValue;

/// Removes every node that cannot reach a live output.
///
/// Live outputs are sinks that at least one other node feeds into; the
/// reachable set is grown backwards from them along incoming edges.
/// Fully isolated nodes (no edges at all) are dead. Idempotent.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadNodeElimination;

impl<V: GraphValue> OptimizationPass<V> for DeadNodeElimination {
    fn name(&self) -> &'static str {
        "dead-node-elimination"
    }

    fn run(&self, graph: &mut Graph<V>) {
        let mut reachable = FxHashSet::default();
        let mut stack: Vec<String> = graph
            .output_nodes()
            .into_iter()
            .filter(|node| !graph.incoming_edges(node.name()).is_empty())
            .map(|node| node.name().to_string())
            .collect();

        for name in &stack {
            reachable.insert(name.clone());
        }
        while let Some(current) = stack.pop() {
            for edge in graph.incoming_edges(&current) {
                let parent = edge.from().name().to_string();
                if reachable.insert(parent.clone()) {
                    stack.push(parent);
                }
            }
        }

        let dead: Vec<String> = graph
            .nodes()
            .into_iter()
            .map(|node| node.name().to_string())
            .filter(|name| !reachable.contains(name))
            .collect();

        for name in &dead {
            graph.remove_node(name);
        }
        if !dead.is_empty() {
            debug!(removed = dead.len(), "eliminated dead nodes");
        }
    }
}
