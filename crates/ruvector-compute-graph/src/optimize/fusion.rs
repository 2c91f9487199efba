//! Linear-chain fusion

use std::sync::Arc;

use tracing::debug;

use super::OptimizationPass;
use crate::edge::Edge;
use crate::error::Result;
use crate::graph::Graph;
use crate::node::{Node, NodeOp};
use crate::value::GraphValue;

/// Compute op of a fused node: runs the original chain in order and
/// returns the last node's result. Each link still goes through its own
/// full `compute`, so per-link stores and callbacks keep working.
pub struct FusedChainOp<V> {
    chain: Vec<Arc<Node<V>>>,
}

impl<V: GraphValue> FusedChainOp<V> {
    /// Names of the fused links, in execution order.
    pub fn link_names(&self) -> Vec<&str> {
        self.chain.iter().map(|node| node.name()).collect()
    }
}

impl<V: GraphValue> NodeOp<V> for FusedChainOp<V> {
    fn compute(&self, level: usize) -> Result<V> {
        let mut result = V::default();
        for node in &self.chain {
            result = node.compute(level)?;
        }
        Ok(result)
    }
}

/// Collapses maximal linear chains into single fused nodes.
///
/// A chain `n1 -> n2 -> ... -> nk` qualifies when every internal node has
/// exactly one outgoing edge and every non-first node exactly one incoming
/// edge. Chains of length >= 2 are replaced by one node named
/// `fused:n1+...+nk`; inbound edges of `n1` and outbound edges of `nk`
/// move to the fused node.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearChainFusion;

impl LinearChainFusion {
    /// Whether `name` starts a chain: its single-incoming/single-outgoing
    /// link backwards does not qualify for extension.
    fn is_chain_head<V: GraphValue>(graph: &Graph<V>, name: &str) -> bool {
        let incoming = graph.incoming_edges(name);
        if incoming.len() != 1 {
            return true;
        }
        // The single parent would absorb this node only if it has exactly
        // one outgoing edge.
        graph.outgoing_edges(incoming[0].from().name()).len() != 1
    }

    /// Extend a chain forward from `head` as far as fusion rules allow.
    fn collect_chain<V: GraphValue>(graph: &Graph<V>, head: &str) -> Vec<String> {
        let mut chain = vec![head.to_string()];
        let mut current = head.to_string();
        loop {
            let outgoing = graph.outgoing_edges(&current);
            if outgoing.len() != 1 {
                break;
            }
            let next = outgoing[0].to().name().to_string();
            if graph.incoming_edges(&next).len() != 1 {
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        chain
    }
}

impl<V: GraphValue> OptimizationPass<V> for LinearChainFusion {
    fn name(&self) -> &'static str {
        "linear-chain-fusion"
    }

    fn run(&self, graph: &mut Graph<V>) {
        let mut names: Vec<String> = graph
            .nodes()
            .iter()
            .map(|node| node.name().to_string())
            .collect();
        names.sort();

        for name in names {
            // A previous fusion may have removed this node already.
            if graph.node(&name).is_none() || !Self::is_chain_head(graph, &name) {
                continue;
            }
            let chain = Self::collect_chain(graph, &name);
            if chain.len() < 2 {
                continue;
            }

            let first = chain.first().map(String::as_str).unwrap_or(&name);
            let last = chain.last().map(String::as_str).unwrap_or(&name);
            let inbound: Vec<Arc<Node<V>>> = graph
                .incoming_edges(first)
                .iter()
                .map(|edge| edge.from().clone())
                .collect();
            let outbound: Vec<Arc<Node<V>>> = graph
                .outgoing_edges(last)
                .iter()
                .map(|edge| edge.to().clone())
                .collect();

            let links: Vec<Arc<Node<V>>> = chain
                .iter()
                .filter_map(|link| graph.remove_node(link))
                .collect();
            let fused_name = format!("fused:{}", chain.join("+"));
            let fused = Node::new(fused_name.clone(), FusedChainOp { chain: links });

            graph
                .add_node(fused.clone())
                .expect("fused node name is fresh");
            for from in inbound {
                graph
                    .add_edge(Edge::new(from, fused.clone()))
                    .expect("chain contraction preserves acyclicity");
            }
            for to in outbound {
                graph
                    .add_edge(Edge::new(fused.clone(), to))
                    .expect("chain contraction preserves acyclicity");
            }

            debug!(fused = %fused_name, links = chain.len(), "fused linear chain");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn constant(name: &str, value: f64) -> Arc<Node<f64>> {
        Node::from_fn(name, move |_level| Ok(value))
    }

    fn chain_graph(names: &[&str]) -> (Graph<f64>, Vec<Arc<Node<f64>>>) {
        let mut graph = Graph::new();
        let nodes: Vec<Arc<Node<f64>>> = names
            .iter()
            .enumerate()
            .map(|(i, name)| constant(name, i as f64))
            .collect();
        for node in &nodes {
            graph.add_node(node.clone()).unwrap();
        }
        for pair in nodes.windows(2) {
            graph
                .add_edge(Edge::new(pair[0].clone(), pair[1].clone()))
                .unwrap();
        }
        (graph, nodes)
    }

    #[test]
    fn test_three_node_line_fuses_to_one() {
        let (mut graph, _) = chain_graph(&["a", "b", "c"]);
        LinearChainFusion.run(&mut graph);

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        let fused = graph.node("fused:a+b+c").unwrap();
        assert_eq!(fused.compute(0).unwrap(), 2.0);
    }

    #[test]
    fn test_boundary_edges_preserved() {
        // head -> a -> b -> sink, with head -> side -> sink closing a
        // diamond: only a -> b is a fusable chain.
        let mut graph: Graph<f64> = Graph::new();
        let head = constant("head", 0.0);
        let a = constant("a", 1.0);
        let b = constant("b", 2.0);
        let side = constant("side", 3.0);
        let sink = constant("sink", 4.0);
        for node in [&head, &a, &b, &side, &sink] {
            graph.add_node(node.clone()).unwrap();
        }
        graph.add_edge(Edge::new(head.clone(), a.clone())).unwrap();
        graph.add_edge(Edge::new(a.clone(), b.clone())).unwrap();
        graph.add_edge(Edge::new(b.clone(), sink.clone())).unwrap();
        graph.add_edge(Edge::new(head.clone(), side.clone())).unwrap();
        graph.add_edge(Edge::new(side.clone(), sink.clone())).unwrap();

        LinearChainFusion.run(&mut graph);

        assert!(graph.node("a").is_none());
        assert!(graph.node("b").is_none());
        let fused = graph.node("fused:a+b").unwrap();
        assert_eq!(graph.incoming_edges(fused.name()).len(), 1);
        assert_eq!(graph.incoming_edges(fused.name())[0].from().name(), "head");
        assert_eq!(graph.outgoing_edges(fused.name()).len(), 1);
        assert_eq!(graph.outgoing_edges(fused.name())[0].to().name(), "sink");
        assert_eq!(graph.outgoing_edges("head").len(), 2);
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_diamond_is_not_fused() {
        let mut graph: Graph<f64> = Graph::new();
        let s = constant("s", 0.0);
        let l = constant("l", 1.0);
        let r = constant("r", 2.0);
        let t = constant("t", 3.0);
        for node in [&s, &l, &r, &t] {
            graph.add_node(node.clone()).unwrap();
        }
        graph.add_edge(Edge::new(s.clone(), l.clone())).unwrap();
        graph.add_edge(Edge::new(s.clone(), r.clone())).unwrap();
        graph.add_edge(Edge::new(l.clone(), t.clone())).unwrap();
        graph.add_edge(Edge::new(r.clone(), t.clone())).unwrap();

        LinearChainFusion.run(&mut graph);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_fused_op_runs_links_in_order() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut graph: Graph<f64> = Graph::new();

        let mut nodes = Vec::new();
        for (index, name) in ["first", "second"].iter().enumerate() {
            let order = order.clone();
            let node: Arc<Node<f64>> = Node::from_fn(*name, move |_level| {
                let seen = order.fetch_add(1, Ordering::SeqCst);
                assert_eq!(seen, index);
                Ok(index as f64)
            });
            graph.add_node(node.clone()).unwrap();
            nodes.push(node);
        }
        graph
            .add_edge(Edge::new(nodes[0].clone(), nodes[1].clone()))
            .unwrap();

        LinearChainFusion.run(&mut graph);
        let fused = graph.node("fused:first+second").unwrap();
        assert_eq!(fused.compute(0).unwrap(), 1.0);
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }
}
