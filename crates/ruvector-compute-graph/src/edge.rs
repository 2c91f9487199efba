//! Directed edges between computation nodes

use std::sync::Arc;

use crate::node::Node;

/// A directed dependency edge: `to` consumes the output of `from`.
///
/// Edges hold shared references to their endpoints; the graph owns the
/// edge itself and removes it with either endpoint.
#[derive(Debug, Clone)]
pub struct Edge<V> {
    from: Arc<Node<V>>,
    to: Arc<Node<V>>,
}

impl<V> Edge<V> {
    /// Create an edge from `from` to `to`.
    pub fn new(from: Arc<Node<V>>, to: Arc<Node<V>>) -> Self {
        Self { from, to }
    }

    /// Producer endpoint.
    pub fn from(&self) -> &Arc<Node<V>> {
        &self.from
    }

    /// Consumer endpoint.
    pub fn to(&self) -> &Arc<Node<V>> {
        &self.to
    }
}
