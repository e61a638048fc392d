//! Layer search and multi-layer KNN descent.

use crate::budget::QueryBudget;
use crate::error::Result;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use crate::math::cosine_distance;
use crate::vectors::EmbeddingStore;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Bounded best-first search of a single layer.
///
/// Returns up to `ef` live nodes closest to `query`, ascending by
/// `(distance, id)`. Tombstoned nodes are traversed for navigation but never
/// returned. The budget is polled once per candidate pop.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search_layer(
    graph: &HnswGraph,
    vectors: &EmbeddingStore,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    budget: &QueryBudget,
) -> Result<Vec<(f32, u32)>> {
    visited.reset();
    // Min-heap of frontier candidates by (distance, id).
    let mut frontier: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> =
        BinaryHeap::with_capacity(ef * 2);
    // Max-heap of current results; peek is the worst kept entry. Ties evict
    // the larger id so equal-distance results stay deterministic.
    let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if !visited.mark(ep) {
            continue;
        }
        let dist = cosine_distance(query, vectors.row(ep));
        frontier.push(Reverse((OrderedFloat(dist), ep)));
        if !graph.is_deleted(ep) {
            results.push((OrderedFloat(dist), ep));
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.0 .0);
            }
        }
    }

    while let Some(Reverse((OrderedFloat(dist), node))) = frontier.pop() {
        budget.check()?;
        if results.len() >= ef && dist > worst {
            break;
        }
        let node_idx = node as usize;
        if layer >= graph.neighbors[node_idx].len() {
            continue;
        }
        for &neighbor in &graph.neighbors[node_idx][layer] {
            if !visited.mark(neighbor) {
                continue;
            }
            let dist = cosine_distance(query, vectors.row(neighbor));
            if results.len() < ef || dist < worst {
                frontier.push(Reverse((OrderedFloat(dist), neighbor)));
                if !graph.is_deleted(neighbor) {
                    results.push((OrderedFloat(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                    worst = if results.len() >= ef {
                        results.peek().map_or(f32::MAX, |r| r.0 .0)
                    } else {
                        f32::MAX
                    };
                }
            }
        }
    }

    Ok(results
        .into_sorted_vec()
        .into_iter()
        .map(|(OrderedFloat(dist), id)| (dist, id))
        .collect())
}

/// Multi-layer KNN: greedy descent from the entry point to layer 1, then a
/// bounded best-first search at layer 0 with `ef = max(ef, k)`.
///
/// Returns up to `k` live nodes as `(id, cosine_distance)` ascending by
/// `(distance, id)`.
pub fn knn_search(
    graph: &HnswGraph,
    vectors: &EmbeddingStore,
    query: &[f32],
    k: usize,
    ef: usize,
    budget: &QueryBudget,
) -> Result<Vec<(u32, f32)>> {
    let Some(entry_point) = graph.entry_point else {
        return Ok(Vec::new());
    };

    let mut visited = VisitedSet::with_capacity(graph.node_count());
    let mut current = entry_point;

    for layer in (1..=graph.max_layer).rev() {
        budget.check()?;
        let nearest = search_layer(
            graph,
            vectors,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            &mut visited,
            budget,
        )?;
        if let Some(&(_, id)) = nearest.first() {
            current = id;
        }
    }

    budget.check()?;
    let mut results = search_layer(
        graph,
        vectors,
        query,
        std::slice::from_ref(&current),
        ef.max(k),
        0,
        &mut visited,
        budget,
    )?;
    results.truncate(k);
    Ok(results.into_iter().map(|(dist, id)| (id, dist)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CancelToken;
    use crate::config::HnswParams;
    use crate::math::normalize;

    fn build(n: usize, dim: usize) -> (HnswGraph, EmbeddingStore) {
        let mut graph = HnswGraph::new(&HnswParams::default());
        let mut vectors = EmbeddingStore::new(dim);
        for i in 0..n {
            let mut row: Vec<f32> = (0..dim)
                .map(|j| (((i * 31 + j * 17) % 101) as f32 / 101.0) - 0.5)
                .collect();
            normalize(&mut row);
            vectors.push(&row);
            graph
                .insert(i as u32, &vectors)
                .expect("construction budget never fires");
        }
        (graph, vectors)
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let graph = HnswGraph::new(&HnswParams::default());
        let vectors = EmbeddingStore::new(4);
        let out = knn_search(
            &graph,
            &vectors,
            &[1.0, 0.0, 0.0, 0.0],
            5,
            50,
            &QueryBudget::unbounded(),
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_self_query_returns_self_first() {
        let (graph, vectors) = build(200, 16);
        let query: Vec<f32> = vectors.row(42).to_vec();
        let out = knn_search(&graph, &vectors, &query, 5, 100, &QueryBudget::unbounded()).unwrap();
        assert_eq!(out[0].0, 42);
        assert!(out[0].1 < 1e-5);
    }

    #[test]
    fn test_results_sorted_by_distance_then_id() {
        let (graph, vectors) = build(100, 8);
        let query: Vec<f32> = vectors.row(0).to_vec();
        let out = knn_search(&graph, &vectors, &query, 10, 64, &QueryBudget::unbounded()).unwrap();
        for pair in out.windows(2) {
            let (id_a, d_a) = pair[0];
            let (id_b, d_b) = pair[1];
            assert!(d_a < d_b || (d_a == d_b && id_a < id_b));
        }
    }

    #[test]
    fn test_tombstoned_nodes_excluded() {
        let (mut graph, vectors) = build(50, 8);
        let query: Vec<f32> = vectors.row(7).to_vec();
        graph.mark_deleted(7);
        let out = knn_search(&graph, &vectors, &query, 10, 64, &QueryBudget::unbounded()).unwrap();
        assert!(out.iter().all(|&(id, _)| id != 7));
        assert!(!out.is_empty(), "deleted node must still navigate");
    }

    #[test]
    fn test_k_larger_than_corpus() {
        let (graph, vectors) = build(5, 8);
        let query: Vec<f32> = vectors.row(0).to_vec();
        let out = knn_search(&graph, &vectors, &query, 50, 64, &QueryBudget::unbounded()).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_cancelled_budget_aborts() {
        let (graph, vectors) = build(200, 16);
        let token = CancelToken::new();
        token.cancel();
        let budget = QueryBudget::unbounded().with_cancel(token);
        let query: Vec<f32> = vectors.row(0).to_vec();
        let out = knn_search(&graph, &vectors, &query, 5, 100, &budget);
        assert!(matches!(out, Err(crate::error::EngineError::Cancelled)));
    }

    #[test]
    fn test_recall_against_brute_force() {
        let (graph, vectors) = build(500, 16);
        let mut hits = 0;
        let probes = 20;
        for p in 0..probes {
            let query: Vec<f32> = vectors.row(p * 23).to_vec();
            let mut exact: Vec<(f32, u32)> = (0..vectors.len() as u32)
                .map(|id| (cosine_distance(&query, vectors.row(id)), id))
                .collect();
            exact.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let approx =
                knn_search(&graph, &vectors, &query, 1, 100, &QueryBudget::unbounded()).unwrap();
            if approx[0].0 == exact[0].1 {
                hits += 1;
            }
        }
        assert!(hits >= probes * 9 / 10, "top-1 recall too low: {hits}/{probes}");
    }
}
