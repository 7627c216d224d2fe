//! A seeded randomized stress scenario: build a random directed reference graph over `MockHost`,
//! compute the expected reachable set with a plain BFS, and check the collector agrees exactly.
//! Grounded on the same "no false frees, no retained garbage" properties `scenarios.rs` checks
//! one fixed graph at a time, but run here across many random shapes for broader coverage.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use gcore::testing::MockHost;
use gcore::{CollectParams, Coordinator, GcConfig};

struct RandomGraph {
    roots: Vec<usize>,
    edges: Vec<(usize, usize)>,
    num_objects: usize,
}

fn build_random_graph(rng: &mut ChaCha8Rng, num_objects: usize, num_roots: usize, num_edges: usize) -> RandomGraph {
    let roots = (0..num_roots).map(|_| rng.random_range(0..num_objects)).collect();
    let edges = (0..num_edges)
        .map(|_| (rng.random_range(0..num_objects), rng.random_range(0..num_objects)))
        .collect();
    RandomGraph { roots, edges, num_objects }
}

fn expected_reachable(graph: &RandomGraph) -> HashSet<usize> {
    let mut adjacency = vec![Vec::new(); graph.num_objects];
    for &(from, to) in &graph.edges {
        adjacency[from].push(to);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    for &root in &graph.roots {
        if seen.insert(root) {
            queue.push_back(root);
        }
    }
    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

fn run_one_trial(seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let num_objects = rng.random_range(20..200);
    let num_roots = rng.random_range(1..(num_objects / 4).max(2));
    let num_edges = rng.random_range(0..(num_objects * 3));
    let graph = build_random_graph(&mut rng, num_objects, num_roots, num_edges);

    let mock = Arc::new(MockHost::new());
    let objects: Vec<_> = (0..graph.num_objects).map(|_| mock.new_object(false)).collect();
    for &(from, to) in &graph.edges {
        mock.add_edge(objects[from], objects[to]);
    }
    for &root in &graph.roots {
        mock.add_explicit_root(objects[root]);
    }

    let config = GcConfig {
        num_workers: 4,
        allow_parallel: true,
        incremental_begin_destroy_enabled: false,
        ..GcConfig::default()
    };
    let coordinator = Coordinator::new(mock.clone(), config);
    coordinator.collect(CollectParams::default());

    let expected = expected_reachable(&graph);
    for (i, &object) in objects.iter().enumerate() {
        let destroyed = mock.is_destroyed(object);
        if expected.contains(&i) {
            assert!(!destroyed, "seed {seed}: object {i} should have survived but was destroyed");
        } else {
            assert!(destroyed, "seed {seed}: object {i} should have been collected but survived");
        }
    }
    coordinator.shutdown();
}

#[test]
fn random_graphs_match_a_plain_bfs_reachability_computation() {
    for seed in 0..12u64 {
        run_one_trial(seed);
    }
}
