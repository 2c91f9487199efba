//! Computation nodes
//!
//! A [`Node`] wraps user compute logic (a [`NodeOp`]) together with a
//! [`PrecisionStore`], a precision policy `[min, max, current]`, and a list
//! of completion callbacks. `compute` serializes per node: the node mutex
//! is held for the full body, so a node is never observed in a torn
//! intermediate state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::error::{ComputeError, Result};
use crate::graph::SharedErrorMap;
use crate::store::PrecisionStore;
use crate::value::GraphValue;

/// Computations run every node's pending updates through a merge at this
/// cadence.
const MERGE_INTERVAL: usize = 10;

/// User-defined compute logic hosted by a [`Node`].
pub trait NodeOp<V>: Send + Sync {
    /// Produce the node's value at the requested precision level.
    fn compute(&self, level: usize) -> Result<V>;
}

impl<V, F> NodeOp<V> for F
where
    F: Fn(usize) -> Result<V> + Send + Sync,
{
    fn compute(&self, level: usize) -> Result<V> {
        self(level)
    }
}

/// Callback invoked after a successful computation is stored.
pub type CompletionCallback<V> = Box<dyn Fn(&Result<V>) + Send + Sync>;

struct NodeState<V> {
    current_level: usize,
    min_level: usize,
    max_level: usize,
    computation_count: usize,
    callbacks: Vec<CompletionCallback<V>>,
}

/// A typed computation unit within a graph.
///
/// Nodes are shared: the owning graph holds one reference while the node is
/// attached, and user code may retain others for inspection. The link back
/// to the owning graph is a shared error map only, never an owning cycle.
pub struct Node<V> {
    name: String,
    store: PrecisionStore<V>,
    op: Box<dyn NodeOp<V>>,
    state: Mutex<NodeState<V>>,
    error_sink: Mutex<Option<Arc<SharedErrorMap>>>,
}

impl<V: GraphValue> Node<V> {
    /// Create a node with the default store configuration.
    pub fn new(name: impl Into<String>, op: impl NodeOp<V> + 'static) -> Arc<Self> {
        Self::with_store_config(name, op, StoreConfig::default())
    }

    /// Create a node whose op is a plain closure over the precision level.
    pub fn from_fn<F>(name: impl Into<String>, op: F) -> Arc<Self>
    where
        F: Fn(usize) -> Result<V> + Send + Sync + 'static,
    {
        Self::new(name, op)
    }

    /// [`from_fn`](Self::from_fn) with an explicit store configuration.
    pub fn from_fn_with_store<F>(
        name: impl Into<String>,
        op: F,
        store_config: StoreConfig,
    ) -> Arc<Self>
    where
        F: Fn(usize) -> Result<V> + Send + Sync + 'static,
    {
        Self::with_store_config(name, op, store_config)
    }

    /// Create a node with an explicit store configuration.
    pub fn with_store_config(
        name: impl Into<String>,
        op: impl NodeOp<V> + 'static,
        store_config: StoreConfig,
    ) -> Arc<Self> {
        let max_depth = store_config.max_depth;
        Arc::new(Self {
            name: name.into(),
            store: PrecisionStore::with_config(store_config),
            op: Box::new(op),
            state: Mutex::new(NodeState {
                current_level: 0,
                min_level: 0,
                max_level: max_depth,
                computation_count: 0,
                callbacks: Vec::new(),
            }),
            error_sink: Mutex::new(None),
        })
    }

    /// Stable node name, unique within a graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compute the node's value at `level`.
    ///
    /// Order of resolution: recorded graph error (early abort), precision
    /// bound check, store cache hit, then the user op. Successful results
    /// are stored, fanned out to completion callbacks in registration
    /// order, and merged into absolutes every [`MERGE_INTERVAL`]
    /// computations. Failures are stamped with this node's name and
    /// recorded in the owning graph's error map.
    pub fn compute(&self, level: usize) -> Result<V> {
        let mut state = self.state.lock();

        if let Some(error) = self.recorded_error() {
            trace!(node = %self.name, "aborting compute, error already recorded");
            return Err(error);
        }

        if level > state.max_level {
            let error = ComputeError::precision(format!(
                "requested precision level {level} exceeds maximum supported level {}",
                state.max_level
            ))
            .with_source_node(&self.name);
            self.record_error(&error);
            return Err(error);
        }

        state.current_level = level;

        if let Some(cached) = self.store.get(level) {
            trace!(node = %self.name, level, "store hit");
            return Ok(cached);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.op.compute(level)));

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(mut error)) => {
                error.trace_through(&self.name);
                self.record_error(&error);
                return Err(error);
            }
            Err(payload) => {
                let error = ComputeError::computation(panic_message(payload.as_ref()))
                    .with_source_node(&self.name);
                self.record_error(&error);
                return Err(error);
            }
        };

        self.store.store(value.clone(), level);

        let result = Ok(value);
        for callback in &state.callbacks {
            callback(&result);
        }

        state.computation_count += 1;
        if state.computation_count % MERGE_INTERVAL == 0 {
            debug!(node = %self.name, count = state.computation_count, "periodic store merge");
            self.store.merge_all();
        }

        result
    }

    /// Register a callback invoked after each successful computation, in
    /// registration order.
    pub fn add_completion_callback(
        &self,
        callback: impl Fn(&Result<V>) + Send + Sync + 'static,
    ) {
        self.state.lock().callbacks.push(Box::new(callback));
    }

    /// Constrain the node's precision range. The current level is clamped
    /// into the new range.
    pub fn set_precision_range(&self, min_level: usize, max_level: usize) -> Result<()> {
        if max_level > self.store.max_depth() {
            return Err(ComputeError::validation(format!(
                "maximum precision level {max_level} exceeds storage capacity {}",
                self.store.max_depth()
            )));
        }
        if min_level > max_level {
            return Err(ComputeError::validation(format!(
                "minimum precision level {min_level} cannot exceed maximum level {max_level}"
            )));
        }

        let mut state = self.state.lock();
        state.min_level = min_level;
        state.max_level = max_level;
        state.current_level = state.current_level.clamp(min_level, max_level);
        Ok(())
    }

    /// Set the current precision level. A target outside `[min, max]` is a
    /// no-op.
    pub fn adjust_precision(&self, target_level: usize) {
        let mut state = self.state.lock();
        if target_level >= state.min_level && target_level <= state.max_level {
            state.current_level = target_level;
        }
    }

    /// Current precision level.
    pub fn current_precision_level(&self) -> usize {
        self.state.lock().current_level
    }

    /// Lowest level this node may run at.
    pub fn min_precision_level(&self) -> usize {
        self.state.lock().min_level
    }

    /// Highest level this node may run at.
    pub fn max_precision_level(&self) -> usize {
        self.state.lock().max_level
    }

    /// Successful computations since creation.
    pub fn computation_count(&self) -> usize {
        self.state.lock().computation_count
    }

    /// Merge the store's pending updates into absolutes.
    pub fn merge_updates(&self) {
        self.store.merge_all();
    }

    /// The node's value store.
    pub fn store(&self) -> &PrecisionStore<V> {
        &self.store
    }

    /// Attach the owning graph's error map. Called by `Graph::add_node`.
    pub(crate) fn attach_error_sink(&self, sink: Arc<SharedErrorMap>) {
        *self.error_sink.lock() = Some(sink);
    }

    /// Detach from the owning graph. Called by `Graph::remove_node`.
    pub(crate) fn detach_error_sink(&self) {
        *self.error_sink.lock() = None;
    }

    fn recorded_error(&self) -> Option<ComputeError> {
        self.error_sink.lock().as_ref()?.get(&self.name)
    }

    fn record_error(&self, error: &ComputeError) {
        if let Some(sink) = self.error_sink.lock().as_ref() {
            sink.record(&self.name, error.clone());
        }
    }
}

impl<V> std::fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("name", &self.name).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "node computation panicked".to_string()
    }
}
