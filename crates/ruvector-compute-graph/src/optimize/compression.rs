//! Memory-aware precision compression

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::OptimizationPass;
use crate::config::CompressionPassConfig;
use crate::graph::Graph;
use crate::node::Node;
use crate::value::GraphValue;

/// Rebalances precision levels under memory pressure.
///
/// Three phases, driven by estimated per-node memory
/// (`(1 << level) * size_of::<V>()`, saturating) and node activity
/// (successful computations so far):
///
/// 1. Above the memory threshold, nodes well below mean activity drop one
///    precision level and merge their stores.
/// 2. With headroom left, high-activity fan-out hubs gain one level,
///    bounded by their range and the remaining budget.
/// 3. Sibling branches of every fork point that share a sink converge on
///    the group's average precision.
#[derive(Debug, Default, Clone)]
pub struct MemoryAwareCompression {
    config: CompressionPassConfig,
}

struct ActivityStats {
    per_node: FxHashMap<String, f64>,
    mean: f64,
}

impl MemoryAwareCompression {
    /// Pass with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass with an explicit configuration.
    pub fn with_config(config: CompressionPassConfig) -> Self {
        Self { config }
    }

    /// Estimated store footprint of a node at `level`.
    fn estimated_memory<V: GraphValue>(level: usize) -> usize {
        1usize
            .checked_shl(level as u32)
            .unwrap_or(usize::MAX)
            .saturating_mul(std::mem::size_of::<V>())
    }

    fn activity_stats<V: GraphValue>(nodes: &[Arc<Node<V>>]) -> ActivityStats {
        let per_node: FxHashMap<String, f64> = nodes
            .iter()
            .map(|node| (node.name().to_string(), node.computation_count() as f64))
            .collect();
        let mean = if per_node.is_empty() {
            0.0
        } else {
            per_node.values().sum::<f64>() / per_node.len() as f64
        };
        ActivityStats { per_node, mean }
    }

    fn compress_inactive<V: GraphValue>(&self, nodes: &[Arc<Node<V>>], stats: &ActivityStats) {
        for node in nodes {
            let activity = stats.per_node[node.name()];
            if activity < self.config.activity_threshold * stats.mean {
                let current = node.current_precision_level();
                if current > node.min_precision_level() {
                    trace!(node = node.name(), from = current, "compressing inactive node");
                    node.adjust_precision(current - 1);
                    node.merge_updates();
                }
            }
        }
    }

    fn expand_hubs<V: GraphValue>(
        &self,
        graph: &Graph<V>,
        nodes: &[Arc<Node<V>>],
        stats: &ActivityStats,
        mut available: usize,
    ) {
        let mut hubs: Vec<&Arc<Node<V>>> = nodes
            .iter()
            .filter(|node| {
                stats.per_node[node.name()] > 2.0 * stats.mean
                    && graph.outgoing_edges(node.name()).len() > 1
            })
            .collect();
        // Most active first; names break ties.
        hubs.sort_by(|a, b| {
            stats.per_node[b.name()]
                .total_cmp(&stats.per_node[a.name()])
                .then_with(|| a.name().cmp(b.name()))
        });

        for hub in hubs {
            let current = hub.current_precision_level();
            if current >= hub.max_precision_level() {
                continue;
            }
            let growth = Self::estimated_memory::<V>(current + 1)
                .saturating_sub(Self::estimated_memory::<V>(current));
            if growth <= available {
                trace!(node = hub.name(), to = current + 1, "expanding hub precision");
                hub.adjust_precision(current + 1);
                available -= growth;
            }
        }
    }

    /// Sinks reachable from `start` along outgoing edges.
    fn reachable_sinks<V: GraphValue>(graph: &Graph<V>, start: &str) -> Vec<String> {
        let mut sinks = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![start.to_string()];
        visited.insert(start.to_string());

        while let Some(current) = stack.pop() {
            let outgoing = graph.outgoing_edges(&current);
            if outgoing.is_empty() {
                sinks.push(current);
                continue;
            }
            for edge in outgoing {
                let next = edge.to().name().to_string();
                if visited.insert(next.clone()) {
                    stack.push(next);
                }
            }
        }
        sinks.sort();
        sinks
    }

    /// For every fork point, group its branch heads by shared sink and
    /// set each group to its average precision, clamped into the range
    /// every member supports.
    fn balance_fork_paths<V: GraphValue>(&self, graph: &Graph<V>) {
        for node in graph.nodes() {
            let outgoing = graph.outgoing_edges(node.name());
            if outgoing.len() < 2 {
                continue;
            }

            let mut groups: FxHashMap<String, Vec<Arc<Node<V>>>> = FxHashMap::default();
            for edge in &outgoing {
                let branch = edge.to().clone();
                for sink in Self::reachable_sinks(graph, branch.name()) {
                    groups.entry(sink).or_default().push(branch.clone());
                }
            }

            let mut sinks: Vec<&String> = groups.keys().collect();
            sinks.sort();
            for sink in sinks {
                let members = &groups[sink];
                if members.len() < 2 {
                    continue;
                }
                let total: usize = members.iter().map(|m| m.current_precision_level()).sum();
                let floor = members
                    .iter()
                    .map(|m| m.min_precision_level())
                    .max()
                    .unwrap_or(0);
                let ceiling = members
                    .iter()
                    .map(|m| m.max_precision_level())
                    .min()
                    .unwrap_or(0);
                if floor > ceiling {
                    continue; // Ranges do not intersect; leave the group alone.
                }
                let target = (total / members.len()).clamp(floor, ceiling);
                trace!(sink = %sink, target, "balancing fork group");
                for member in members {
                    member.adjust_precision(target);
                }
            }
        }
    }
}

impl<V: GraphValue> OptimizationPass<V> for MemoryAwareCompression {
    fn name(&self) -> &'static str {
        "memory-aware-compression"
    }

    fn run(&self, graph: &mut Graph<V>) {
        let nodes = graph.nodes();
        if nodes.len() < 2 {
            return;
        }

        let total_budget = nodes.len().saturating_mul(self.config.node_memory_budget);
        let used: usize = nodes
            .iter()
            .map(|node| Self::estimated_memory::<V>(node.current_precision_level()))
            .fold(0, usize::saturating_add);
        let usage_ratio = used as f64 / total_budget as f64;
        let stats = Self::activity_stats(&nodes);
        debug!(
            nodes = nodes.len(),
            usage_ratio, mean_activity = stats.mean, "memory-aware compression"
        );

        if usage_ratio > self.config.memory_threshold {
            self.compress_inactive(&nodes, &stats);
        } else {
            let available = total_budget.saturating_sub(used);
            self.expand_hubs(graph, &nodes, &stats, available);
        }

        self.balance_fork_paths(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::edge::Edge;

    fn constant(name: &str, value: f64) -> Arc<Node<f64>> {
        Node::from_fn(name, move |_level| Ok(value))
    }

    /// Tight per-node budget so high levels overflow it.
    fn pressured() -> MemoryAwareCompression {
        MemoryAwareCompression::with_config(CompressionPassConfig {
            memory_threshold: 0.8,
            activity_threshold: 0.2,
            node_memory_budget: 64,
        })
    }

    #[test]
    fn test_estimated_memory_saturates() {
        assert_eq!(
            MemoryAwareCompression::estimated_memory::<f64>(3),
            8 * std::mem::size_of::<f64>()
        );
        assert_eq!(
            MemoryAwareCompression::estimated_memory::<f64>(10_000),
            usize::MAX
        );
    }

    #[test]
    fn test_inactive_nodes_compressed_under_pressure() {
        let mut graph: Graph<f64> = Graph::new();
        let busy = constant("busy", 1.0);
        let idle = constant("idle", 2.0);
        graph.add_node(busy.clone()).unwrap();
        graph.add_node(idle.clone()).unwrap();
        graph.add_edge(Edge::new(busy.clone(), idle.clone())).unwrap();

        // Run busy a few times so idle sits far below mean activity.
        for level in [0, 1, 2, 3] {
            busy.compute(level).unwrap();
        }
        busy.adjust_precision(6);
        idle.adjust_precision(6);

        pressured().run(&mut graph);

        assert_eq!(idle.current_precision_level(), 5);
        assert_eq!(busy.current_precision_level(), 6);
    }

    #[test]
    fn test_hot_hub_expanded_with_headroom() {
        let mut graph: Graph<f64> = Graph::new();
        let hub = Node::from_fn_with_store(
            "hub",
            |_level: usize| Ok(1.0),
            StoreConfig::default(),
        );
        let left = constant("left", 2.0);
        let right = constant("right", 3.0);
        for node in [&hub, &left, &right] {
            graph.add_node(node.clone()).unwrap();
        }
        graph.add_edge(Edge::new(hub.clone(), left.clone())).unwrap();
        graph.add_edge(Edge::new(hub.clone(), right.clone())).unwrap();

        for level in [0, 1, 2] {
            hub.compute(level).unwrap();
        }
        hub.adjust_precision(2);

        // Default config: plenty of headroom, hub is hot and fans out.
        MemoryAwareCompression::new().run(&mut graph);
        assert_eq!(hub.current_precision_level(), 3);
    }

    #[test]
    fn test_fork_branches_balanced_to_average() {
        let mut graph: Graph<f64> = Graph::new();
        let fork = constant("fork", 0.0);
        let high = constant("high", 1.0);
        let low = constant("low", 2.0);
        let sink = constant("sink", 3.0);
        for node in [&fork, &high, &low, &sink] {
            graph.add_node(node.clone()).unwrap();
        }
        graph.add_edge(Edge::new(fork.clone(), high.clone())).unwrap();
        graph.add_edge(Edge::new(fork.clone(), low.clone())).unwrap();
        graph.add_edge(Edge::new(high.clone(), sink.clone())).unwrap();
        graph.add_edge(Edge::new(low.clone(), sink.clone())).unwrap();

        high.adjust_precision(6);
        low.adjust_precision(2);

        MemoryAwareCompression::new().run(&mut graph);

        // Both branches land on the (6 + 2) / 2 average.
        assert_eq!(high.current_precision_level(), 4);
        assert_eq!(low.current_precision_level(), 4);
    }

    #[test]
    fn test_small_graph_untouched() {
        let mut graph: Graph<f64> = Graph::new();
        let only = constant("only", 1.0);
        graph.add_node(only.clone()).unwrap();
        only.adjust_precision(5);

        pressured().run(&mut graph);
        assert_eq!(only.current_precision_level(), 5);
    }
}
