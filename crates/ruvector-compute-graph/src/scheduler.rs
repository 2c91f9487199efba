//! Parallel graph execution
//!
//! `Graph::execute` runs the optimization pipeline, then evaluates every
//! node on the worker pool. Each node gets a claim slot: the first thread
//! to reach it (a pooled driver or a consumer resolving its dependencies)
//! runs it, everyone else blocks until its result is published. Claims make
//! compute at-most-once per execution and double as the inline-execution
//! escape hatch that keeps a saturated pool deadlock-free.
//!
//! Failures are absorbed into the graph's shared error map: a failed
//! dependency is copied to each consumer with the consumer appended to the
//! propagation path, any recorded error fails the rest of the run fast, and
//! a final fixpoint walk guarantees every node downstream of a failure has
//! an entry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::cache::ResultCache;
use crate::error::{ComputeError, Result};
use crate::graph::{Graph, SharedErrorMap};
use crate::node::{panic_message, Node};
use crate::value::GraphValue;

enum TaskState<V> {
    Pending,
    Running,
    Done(Result<V>),
}

/// Claim slot for one node in one execution.
struct NodeTask<V> {
    state: Mutex<TaskState<V>>,
    done: Condvar,
}

impl<V: GraphValue> NodeTask<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        }
    }

    /// Claim the task if nobody has. Returns `false` when another thread
    /// owns or finished it.
    fn try_claim(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Running;
            true
        } else {
            false
        }
    }

    fn publish(&self, result: Result<V>) {
        *self.state.lock() = TaskState::Done(result);
        self.done.notify_all();
    }

    fn wait_done(&self) -> Result<V> {
        let mut state = self.state.lock();
        loop {
            if let TaskState::Done(result) = &*state {
                return result.clone();
            }
            self.done.wait(&mut state);
        }
    }
}

/// Immutable execution snapshot shared across worker threads.
struct ExecPlan<V> {
    nodes: FxHashMap<String, Arc<Node<V>>>,
    incoming: FxHashMap<String, Vec<String>>,
    tasks: FxHashMap<String, Arc<NodeTask<V>>>,
    errors: Arc<SharedErrorMap>,
    cache: Arc<Mutex<ResultCache<V>>>,
}

impl<V: GraphValue> ExecPlan<V> {
    /// Pool driver entry: run the node if unclaimed, otherwise leave it to
    /// whoever claimed it.
    fn drive(&self, name: &str) {
        if self.tasks[name].try_claim() {
            self.run_and_publish(name);
        }
    }

    /// Resolve a node's result, claiming and running it inline when it is
    /// still pending. Blocking here is safe: every claim is immediately
    /// followed by a run-and-publish on the claiming thread, and
    /// dependency order is acyclic.
    fn resolve(&self, name: &str) -> Result<V> {
        let task = &self.tasks[name];
        if task.try_claim() {
            self.run_and_publish(name)
        } else {
            task.wait_done()
        }
    }

    /// Run a claimed node and publish its result, converting a panic that
    /// escapes user callbacks into a computation error so waiters are
    /// never stranded.
    fn run_and_publish(&self, name: &str) -> Result<V> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_claimed(name)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                warn!(node = name, "node execution panicked outside compute");
                Err(ComputeError::computation(panic_message(payload.as_ref()))
                    .with_source_node(name))
            }
        };
        self.tasks[name].publish(result.clone());
        result
    }

    /// Execute a claimed node: resolve its dependencies, absorb their
    /// failures, honor graph-wide fail-fast, then run the node itself and
    /// record its value in the result cache.
    ///
    /// Sibling parallelism comes from the per-node drivers `execute`
    /// already enqueued; an idle worker picks up any still-pending
    /// dependency, and a busy pool falls back to resolving it inline.
    fn run_claimed(&self, name: &str) -> Result<V> {
        let deps = self.incoming.get(name).cloned().unwrap_or_default();

        for dep in &deps {
            if let Err(error) = self.resolve(dep) {
                let mut adopted = error;
                adopted.trace_through(name);
                if let Some(source) = adopted.source_node() {
                    let source = source.to_string();
                    self.errors.record(&source, adopted.clone());
                }
                self.errors.record(name, adopted.clone());
                trace!(node = name, "dependency failed, skipping compute");
                return Err(adopted);
            }
        }

        // Fail fast once any node has failed anywhere in the graph.
        if !self.errors.is_empty() {
            if let Some(error) = self.errors.first_by_name() {
                let mut adopted = error;
                adopted.trace_through(name);
                self.errors.record(name, adopted.clone());
                trace!(node = name, "adopting existing graph error");
                return Err(adopted);
            }
        }

        let node = &self.nodes[name];
        let level = node.current_precision_level();
        match node.compute(level) {
            Ok(value) => {
                self.cache.lock().insert(&value);
                Ok(value)
            }
            Err(error) => {
                self.errors.record(name, error.clone());
                Err(error)
            }
        }
    }
}

impl<V: GraphValue> Graph<V> {
    /// Run the optimization passes, then evaluate the whole graph on the
    /// worker pool.
    ///
    /// Always completes, even when nodes fail; inspect failures through
    /// [`get_node_error`](Graph::get_node_error). Each node's op is
    /// invoked at most once per execution, and only after every transitive
    /// dependency has produced a value or an error.
    pub fn execute(&mut self) -> Result<()> {
        self.errors.clear();

        let passes = std::mem::take(&mut self.passes);
        for pass in &passes {
            debug!(pass = pass.name(), "running optimization pass");
            pass.run(self);
        }
        self.passes = passes;

        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();

        let plan = Arc::new(ExecPlan {
            nodes: self.nodes.clone(),
            incoming: self.reverse_edges.clone(),
            tasks: names
                .iter()
                .map(|name| (name.clone(), Arc::new(NodeTask::new())))
                .collect(),
            errors: self.errors.clone(),
            cache: self.result_cache.clone(),
        });

        debug!(nodes = names.len(), "scheduling graph execution");

        let mut drivers = Vec::with_capacity(names.len());
        for name in &names {
            let plan = plan.clone();
            let name = name.clone();
            match self.pool.enqueue(move || plan.drive(&name)) {
                Ok(handle) => drivers.push(handle),
                Err(_) => {
                    // Pool already stopped; the join loop below still
                    // covers every node via resolve().
                }
            }
        }
        for handle in drivers {
            handle.wait();
        }
        // Anything a stopped pool never drove resolves inline here.
        for name in &names {
            let _ = plan.resolve(name);
        }

        self.propagate_errors(&names);
        Ok(())
    }

    /// Error-propagation fixpoint: every node with a failed predecessor
    /// inherits a copy of that error with itself appended to the path.
    fn propagate_errors(&self, sorted_names: &[String]) {
        loop {
            let mut changed = false;
            for name in sorted_names {
                if self.errors.get(name).is_some() {
                    continue;
                }
                let Some(predecessors) = self.reverse_edges.get(name) else {
                    continue;
                };
                for predecessor in predecessors {
                    if let Some(error) = self.errors.get(predecessor) {
                        let mut inherited = error;
                        inherited.add_propagation_path(name);
                        self.errors.record(name, inherited);
                        changed = true;
                        break;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        if !self.errors.is_empty() {
            debug!(
                failed = self.errors.snapshot().len(),
                "execution finished with recorded errors"
            );
        }
    }
}
