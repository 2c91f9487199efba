//! Backward precision propagation

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::OptimizationPass;
use crate::config::PrecisionPassConfig;
use crate::graph::Graph;
use crate::node::Node;
use crate::value::GraphValue;

/// Propagates precision requirements backwards from output nodes.
///
/// Each output seeds its own current level. For every dependency edge the
/// consumer's requirement is carried over, bumped by one when the
/// estimated quantization error of the dependency exceeds the threshold
/// and dropped by one when it falls below half of it. Nodes adopt the
/// maximum requirement any consumer asks for, clamped into their own
/// `[min, max]` range.
#[derive(Debug, Default, Clone)]
pub struct PrecisionPropagation {
    config: PrecisionPassConfig,
}

impl PrecisionPropagation {
    /// Pass with the default error threshold.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass with an explicit configuration.
    pub fn with_config(config: PrecisionPassConfig) -> Self {
        Self { config }
    }

    /// Quantization error of reading `dep` at `required` instead of its
    /// current level. `None` when the store cannot answer yet; the caller
    /// treats that as the neutral `threshold / 2`.
    fn estimated_error<V: GraphValue>(dep: &Node<V>, required: usize) -> Option<f64> {
        let at_required = dep.store().get(required)?;
        let at_current = dep.store().get(dep.current_precision_level())?;
        Some(at_required.distance(&at_current))
    }

    fn required_for_dependency<V: GraphValue>(
        &self,
        dep: &Node<V>,
        consumer_requirement: usize,
    ) -> usize {
        let threshold = self.config.error_threshold;
        let estimate =
            Self::estimated_error(dep, consumer_requirement).unwrap_or(threshold / 2.0);

        if estimate > threshold {
            (consumer_requirement + 1).min(dep.max_precision_level())
        } else if estimate < threshold / 2.0 {
            consumer_requirement
                .saturating_sub(1)
                .max(dep.min_precision_level())
        } else {
            consumer_requirement
        }
    }
}

impl<V: GraphValue> OptimizationPass<V> for PrecisionPropagation {
    fn name(&self) -> &'static str {
        "precision-propagation"
    }

    fn run(&self, graph: &mut Graph<V>) {
        let mut requirements: FxHashMap<String, usize> = FxHashMap::default();
        let mut queue: VecDeque<String> = VecDeque::new();

        for output in graph.output_nodes() {
            requirements.insert(output.name().to_string(), output.current_precision_level());
            queue.push_back(output.name().to_string());
        }

        while let Some(current) = queue.pop_front() {
            let consumer_requirement = requirements[&current];
            for edge in graph.incoming_edges(&current) {
                let dep = edge.from();
                let required = self.required_for_dependency(dep.as_ref(), consumer_requirement);

                let name = dep.name().to_string();
                let update = match requirements.get(&name) {
                    Some(&existing) => required > existing,
                    None => true,
                };
                if update {
                    trace!(node = %name, required, "raising precision requirement");
                    requirements.insert(name.clone(), required);
                    queue.push_back(name);
                }
            }
        }

        for (name, required) in &requirements {
            if let Some(node) = graph.node(name) {
                let clamped =
                    (*required).clamp(node.min_precision_level(), node.max_precision_level());
                node.adjust_precision(clamped);
            }
        }
        debug!(nodes = requirements.len(), "applied precision requirements");
    }
}
