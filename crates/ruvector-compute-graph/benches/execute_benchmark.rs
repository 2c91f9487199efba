use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ruvector_compute_graph::{Edge, Graph, GraphConfig, Node, PrecisionStore};

/// Layered fan-out graph: `layers` rows of `width` nodes, each node fed by
/// every node of the previous row.
fn build_layered_graph(layers: usize, width: usize) -> Graph<f64> {
    let mut graph = Graph::with_config(GraphConfig::default());
    let mut previous: Vec<Arc<Node<f64>>> = Vec::new();

    for layer in 0..layers {
        let mut row = Vec::with_capacity(width);
        for i in 0..width {
            let node = Node::from_fn(format!("n{layer}-{i}"), move |level| {
                Ok((layer * 31 + i) as f64 + level as f64 * 0.5)
            });
            graph.add_node(node.clone()).unwrap();
            for parent in &previous {
                graph
                    .add_edge(Edge::new(parent.clone(), node.clone()))
                    .unwrap();
            }
            row.push(node);
        }
        previous = row;
    }
    graph
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_execute");

    for (layers, width) in [(4, 4), (8, 8), (16, 8)] {
        let label = format!("{layers}x{width}");
        group.bench_with_input(
            BenchmarkId::from_parameter(label),
            &(layers, width),
            |b, &(layers, width)| {
                b.iter(|| {
                    let mut graph = build_layered_graph(layers, width);
                    graph.execute().unwrap();
                    graph
                })
            },
        );
    }

    group.finish();
}

fn bench_store_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_merge");

    for writes in [100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(writes),
            &writes,
            |b, &writes| {
                b.iter(|| {
                    let store: PrecisionStore<f64> = PrecisionStore::new(8, 1e-3);
                    for i in 0..writes {
                        store.store(i as f64 * 0.001, i % 9);
                    }
                    store.merge_all();
                    store
                })
            },
        );
    }

    group.finish();
}

fn bench_cycle_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_edge_cycle_check");

    for size in [50usize, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut graph: Graph<f64> = Graph::new();
                let nodes: Vec<Arc<Node<f64>>> = (0..size)
                    .map(|i| Node::from_fn(format!("n{i:04}"), move |_| Ok(i as f64)))
                    .collect();
                for node in &nodes {
                    graph.add_node(node.clone()).unwrap();
                }
                for pair in nodes.windows(2) {
                    graph
                        .add_edge(Edge::new(pair[0].clone(), pair[1].clone()))
                        .unwrap();
                }
                graph
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_execute, bench_store_merge, bench_cycle_check);
criterion_main!(benches);
