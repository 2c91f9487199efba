//! Graph ownership, topology, and introspection
//!
//! A [`Graph`] owns a set of uniquely named nodes and the directed edges
//! between them, rejects edges that would introduce a cycle, hosts the
//! result cache and the optimization pass pipeline, and holds the shared
//! `name -> error` map nodes consult for early aborts.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::cache::{CacheStats, EvictionPolicy, ResultCache};
use crate::config::{CachePolicyKind, GraphConfig};
use crate::edge::Edge;
use crate::error::{ComputeError, ErrorRecord, Result};
use crate::node::Node;
use crate::optimize::OptimizationPass;
use crate::pool::WorkerPool;
use crate::value::GraphValue;

/// Shared `node name -> error` map.
///
/// One per graph, handed to every attached node as a non-owning back-link
/// (the map never references nodes, so no cycle forms). The first error
/// recorded for a name wins; later records for the same name are ignored.
#[derive(Debug, Default)]
pub(crate) struct SharedErrorMap {
    entries: Mutex<FxHashMap<String, ComputeError>>,
}

impl SharedErrorMap {
    pub(crate) fn get(&self, name: &str) -> Option<ComputeError> {
        self.entries.lock().get(name).cloned()
    }

    pub(crate) fn record(&self, name: &str, error: ComputeError) {
        self.entries
            .lock()
            .entry(name.to_string())
            .or_insert(error);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.entries.lock().remove(name);
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The recorded error with the lexicographically smallest node name.
    /// Deterministic tie-break for fail-fast adoption.
    pub(crate) fn first_by_name(&self) -> Option<ComputeError> {
        let entries = self.entries.lock();
        entries
            .keys()
            .min()
            .and_then(|name| entries.get(name))
            .cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, ComputeError)> {
        let mut entries: Vec<(String, ComputeError)> = self
            .entries
            .lock()
            .iter()
            .map(|(name, error)| (name.clone(), error.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// A directed acyclic graph of computation nodes.
///
/// The graph exclusively owns its edges; nodes are shared with user code
/// while attached. `execute` (see the scheduler module) runs the
/// optimization pipeline and then evaluates every node on the worker pool.
pub struct Graph<V> {
    pub(crate) nodes: FxHashMap<String, Arc<Node<V>>>,
    pub(crate) edges: FxHashMap<String, Vec<String>>,
    pub(crate) reverse_edges: FxHashMap<String, Vec<String>>,
    pub(crate) errors: Arc<SharedErrorMap>,
    pub(crate) result_cache: Arc<Mutex<ResultCache<V>>>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) passes: Vec<Box<dyn OptimizationPass<V>>>,
}

impl<V: GraphValue> Graph<V> {
    /// Create a graph with the default configuration (LRU result cache,
    /// hardware-concurrency worker pool).
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create a graph from an explicit configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        let policy = match config.cache_policy {
            CachePolicyKind::Lru => EvictionPolicy::lru(config.cache_capacity),
            CachePolicyKind::Lfu => EvictionPolicy::lfu(config.cache_capacity),
        };
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            reverse_edges: FxHashMap::default(),
            errors: Arc::new(SharedErrorMap::default()),
            result_cache: Arc::new(Mutex::new(ResultCache::new(policy))),
            pool: Arc::new(WorkerPool::new(config.worker_threads)),
            passes: Vec::new(),
        }
    }

    /// Register a node. Fails with a validation error if the name is
    /// already taken.
    pub fn add_node(&mut self, node: Arc<Node<V>>) -> Result<()> {
        let name = node.name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(ComputeError::validation(format!(
                "node name {name:?} is already registered"
            )));
        }

        node.attach_error_sink(self.errors.clone());
        self.edges.entry(name.clone()).or_default();
        self.reverse_edges.entry(name.clone()).or_default();
        self.nodes.insert(name, node);
        Ok(())
    }

    /// Detach a node: removes all incident edges, clears its error entry,
    /// and breaks the back-link. Returns the node if it was a member.
    pub fn remove_node(&mut self, name: &str) -> Option<Arc<Node<V>>> {
        let node = self.nodes.remove(name)?;

        if let Some(children) = self.edges.remove(name) {
            for child in children {
                if let Some(parents) = self.reverse_edges.get_mut(&child) {
                    parents.retain(|p| p != name);
                }
            }
        }
        if let Some(parents) = self.reverse_edges.remove(name) {
            for parent in parents {
                if let Some(children) = self.edges.get_mut(&parent) {
                    children.retain(|c| c != name);
                }
            }
        }

        self.errors.remove(name);
        node.detach_error_sink();
        debug!(node = name, "removed node");
        Some(node)
    }

    /// Insert a directed edge. Fails with a validation error if either
    /// endpoint is not a member, the edge is a self-loop, or insertion
    /// would create a cycle. The graph is unchanged on failure.
    pub fn add_edge(&mut self, edge: Edge<V>) -> Result<()> {
        let from = edge.from().name().to_string();
        let to = edge.to().name().to_string();

        for (name, node) in [(&from, edge.from()), (&to, edge.to())] {
            match self.nodes.get(name) {
                Some(member) if Arc::ptr_eq(member, node) => {}
                _ => {
                    return Err(ComputeError::validation(format!(
                        "edge endpoint {name:?} is not a member of this graph"
                    )))
                }
            }
        }

        if from == to {
            return Err(ComputeError::validation(format!(
                "self-loop on node {from:?} is not allowed"
            )));
        }

        if self.edges[&from].contains(&to) {
            return Ok(()); // Edge set semantics: duplicate insertion coalesces.
        }

        if self.reaches(&to, &from) {
            return Err(ComputeError::validation(format!(
                "edge {from:?} -> {to:?} would create a cycle"
            )));
        }

        if let Some(children) = self.edges.get_mut(&from) {
            children.push(to.clone());
        }
        if let Some(parents) = self.reverse_edges.get_mut(&to) {
            parents.push(from);
        }
        Ok(())
    }

    /// Whether `target` is reachable from `start` along outgoing edges.
    fn reaches(&self, start: &str, target: &str) -> bool {
        if start == target {
            return true;
        }
        let mut visited = FxHashSet::default();
        let mut stack = vec![start.to_string()];
        visited.insert(start.to_string());

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if let Some(children) = self.edges.get(&current) {
                for child in children {
                    if visited.insert(child.clone()) {
                        stack.push(child.clone());
                    }
                }
            }
        }
        false
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<Arc<Node<V>>> {
        self.nodes.get(name).cloned()
    }

    /// All member nodes, sorted by name for deterministic iteration.
    pub fn nodes(&self) -> Vec<Arc<Node<V>>> {
        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.nodes.get(name).cloned())
            .collect()
    }

    /// Number of member nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Edges arriving at `name`, in insertion order.
    pub fn incoming_edges(&self, name: &str) -> Vec<Edge<V>> {
        let Some(to) = self.nodes.get(name) else {
            return Vec::new();
        };
        self.reverse_edges
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|parent| self.nodes.get(parent))
            .map(|from| Edge::new(from.clone(), to.clone()))
            .collect()
    }

    /// Edges leaving `name`, in insertion order.
    pub fn outgoing_edges(&self, name: &str) -> Vec<Edge<V>> {
        let Some(from) = self.nodes.get(name) else {
            return Vec::new();
        };
        self.edges
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|child| self.nodes.get(child))
            .map(|to| Edge::new(from.clone(), to.clone()))
            .collect()
    }

    /// Nodes with no outgoing edges, sorted by name.
    pub fn output_nodes(&self) -> Vec<Arc<Node<V>>> {
        let mut names: Vec<&String> = self
            .nodes
            .keys()
            .filter(|name| self.edges.get(*name).map_or(true, Vec::is_empty))
            .collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.nodes.get(name).cloned())
            .collect()
    }

    /// Swap the result-cache eviction policy; cached contents are
    /// discarded.
    pub fn set_cache_policy(&mut self, policy: EvictionPolicy) {
        *self.result_cache.lock() = ResultCache::new(policy);
    }

    /// Drop all cached results, keeping the policy.
    pub fn clear_result_cache(&mut self) {
        self.result_cache.lock().clear();
    }

    /// Result-cache hit/miss/eviction counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.result_cache.lock().stats()
    }

    /// Append an optimization pass; passes run in insertion order before
    /// every execution.
    pub fn add_optimization_pass(&mut self, pass: Box<dyn OptimizationPass<V>>) {
        self.passes.push(pass);
    }

    /// Concurrent-safe read of a node's recorded error.
    pub fn get_node_error(&self, name: &str) -> Option<ErrorRecord> {
        self.errors.get(name).map(|error| error.to_record())
    }
}

impl<V: GraphValue> Default for Graph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for Graph<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.values().map(Vec::len).sum::<usize>())
            .field("passes", &self.passes.len())
            .finish()
    }
}
