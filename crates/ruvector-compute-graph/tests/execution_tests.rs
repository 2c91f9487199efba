//! Scheduler and error-propagation integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ruvector_compute_graph::{
    ComputeError, Edge, ErrorKind, Graph, GraphConfig, Node,
};

fn counting(name: &str, value: f64, counter: Arc<AtomicUsize>) -> Arc<Node<f64>> {
    Node::from_fn(name, move |_level| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    })
}

#[test]
fn test_cache_hit_short_circuits_computation() {
    let counter = Arc::new(AtomicUsize::new(0));
    let node = counting("n", 7.0, counter.clone());

    assert_eq!(node.compute(0).unwrap(), 7.0);
    assert_eq!(node.compute(0).unwrap(), 7.0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_compute_impl_at_most_once_per_execute() {
    let mut graph: Graph<f64> = Graph::new();
    let counter = Arc::new(AtomicUsize::new(0));

    // Wide fan-in: one shared dependency feeding many consumers.
    let shared = counting("shared", 1.0, counter.clone());
    graph.add_node(shared.clone()).unwrap();
    for i in 0..16 {
        let consumer = counting(&format!("consumer-{i:02}"), 2.0, counter.clone());
        graph.add_node(consumer.clone()).unwrap();
        graph.add_edge(Edge::new(shared.clone(), consumer)).unwrap();
    }

    graph.execute().unwrap();
    // 1 shared + 16 consumers, each exactly once.
    assert_eq!(counter.load(Ordering::SeqCst), 17);
    assert_eq!(shared.computation_count(), 1);
}

#[test]
fn test_diamond_error_propagation() {
    let mut graph: Graph<f64> = Graph::new();

    let s: Arc<Node<f64>> = Node::from_fn("s", |_level| {
        Err(ComputeError::precision("p"))
    });
    let l: Arc<Node<f64>> = Node::from_fn("l", |_level| Ok(1.0));
    let r: Arc<Node<f64>> = Node::from_fn("r", |_level| Ok(2.0));
    let t: Arc<Node<f64>> = Node::from_fn("t", |_level| Ok(3.0));
    for node in [&s, &l, &r, &t] {
        graph.add_node(node.clone()).unwrap();
    }
    graph.add_edge(Edge::new(s.clone(), l.clone())).unwrap();
    graph.add_edge(Edge::new(s.clone(), r.clone())).unwrap();
    graph.add_edge(Edge::new(l.clone(), t.clone())).unwrap();
    graph.add_edge(Edge::new(r.clone(), t.clone())).unwrap();

    graph.execute().unwrap();

    let source = graph.get_node_error("s").unwrap();
    assert_eq!(source.kind, ErrorKind::Precision);
    assert_eq!(source.source_node.as_deref(), Some("s"));

    let sink = graph.get_node_error("t").unwrap();
    assert_eq!(sink.source_node.as_deref(), Some("s"));
    assert!(
        sink.propagation_path.contains(&"l".to_string())
            || sink.propagation_path.contains(&"r".to_string())
    );
    assert!(sink.propagation_path.contains(&"t".to_string()));

    // Both branches carry entries as well.
    assert!(graph.get_node_error("l").is_some());
    assert!(graph.get_node_error("r").is_some());
}

#[test]
fn test_downstream_of_failure_never_computes() {
    let mut graph: Graph<f64> = Graph::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let bad: Arc<Node<f64>> = Node::from_fn("bad", |_level| {
        Err(ComputeError::computation("boom"))
    });
    graph.add_node(bad.clone()).unwrap();

    let mut previous = bad;
    for i in 0..5 {
        let ran = ran.clone();
        let next: Arc<Node<f64>> = Node::from_fn(format!("down-{i}"), move |_level| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(0.0)
        });
        graph.add_node(next.clone()).unwrap();
        graph.add_edge(Edge::new(previous, next.clone())).unwrap();
        previous = next;
    }

    graph.execute().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    for i in 0..5 {
        let record = graph.get_node_error(&format!("down-{i}")).unwrap();
        assert_eq!(record.source_node.as_deref(), Some("bad"));
    }
}

#[test]
fn test_execute_completes_despite_failures() {
    let mut graph: Graph<f64> = Graph::new();
    let good: Arc<Node<f64>> = Node::from_fn("good", |_level| Ok(1.0));
    let bad: Arc<Node<f64>> = Node::from_fn("bad", |_level| {
        Err(ComputeError::computation("boom"))
    });
    graph.add_node(good).unwrap();
    graph.add_node(bad).unwrap();

    // execute itself reports success; failures live in the error map.
    assert!(graph.execute().is_ok());
    assert!(graph.get_node_error("bad").is_some());
}

#[test]
fn test_independent_siblings_with_single_worker() {
    // A single-threaded pool must still finish arbitrary graphs.
    let mut graph: Graph<f64> = Graph::with_config(GraphConfig {
        worker_threads: 1,
        ..GraphConfig::default()
    });
    let counter = Arc::new(AtomicUsize::new(0));

    let root = counting("root", 0.0, counter.clone());
    let left = counting("left", 1.0, counter.clone());
    let right = counting("right", 2.0, counter.clone());
    let sink = counting("sink", 3.0, counter.clone());
    for node in [&root, &left, &right, &sink] {
        graph.add_node(node.clone()).unwrap();
    }
    graph.add_edge(Edge::new(root.clone(), left.clone())).unwrap();
    graph.add_edge(Edge::new(root.clone(), right.clone())).unwrap();
    graph.add_edge(Edge::new(left.clone(), sink.clone())).unwrap();
    graph.add_edge(Edge::new(right.clone(), sink.clone())).unwrap();

    graph.execute().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn test_callbacks_observe_results_in_order() {
    let node: Arc<Node<f64>> = Node::from_fn("watched", |_level| Ok(1.5));
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["alpha", "beta"] {
        let seen = seen.clone();
        node.add_completion_callback(move |result| {
            seen.lock().push((tag, result.as_ref().ok().copied()));
        });
    }

    node.compute(0).unwrap();
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], ("alpha", Some(1.5)));
    assert_eq!(seen[1], ("beta", Some(1.5)));
}

#[test]
fn test_panicking_op_reported_as_computation_error() {
    let mut graph: Graph<f64> = Graph::new();
    let node: Arc<Node<f64>> = Node::from_fn("volatile", |_level| -> ruvector_compute_graph::Result<f64> {
        panic!("singularity");
    });
    graph.add_node(node).unwrap();

    graph.execute().unwrap();
    let record = graph.get_node_error("volatile").unwrap();
    assert_eq!(record.kind, ErrorKind::Computation);
    assert_eq!(record.message, "singularity");
}

#[test]
fn test_result_cache_deduplicates_across_nodes() {
    let mut graph: Graph<f64> = Graph::new();
    // Two nodes producing the same value: the cache records it once.
    let a: Arc<Node<f64>> = Node::from_fn("a", |_level| Ok(5.0));
    let b: Arc<Node<f64>> = Node::from_fn("b", |_level| Ok(5.0));
    graph.add_node(a).unwrap();
    graph.add_node(b).unwrap();

    graph.execute().unwrap();
    let stats = graph.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_reexecution_uses_node_stores() {
    let mut graph: Graph<f64> = Graph::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let node = counting("stable", 2.0, counter.clone());
    graph.add_node(node).unwrap();

    graph.execute().unwrap();
    graph.execute().unwrap();
    // Second run hits the node's precision store.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
