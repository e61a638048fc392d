//! HNSW insertion with heuristic neighbor selection.
//!
//! Follows the original HNSW construction algorithm: greedy descent to the
//! node's level, ef_construction-bounded layer searches collecting neighbor
//! candidates, diversity-pruned selection, then bidirectional linking with
//! over-capacity pruning.

use crate::budget::QueryBudget;
use crate::error::Result;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::math::cosine_distance;
use crate::vectors::EmbeddingStore;

impl HnswGraph {
    /// Insert node `id`, whose vector must already be row `id` of `vectors`.
    /// Ids are dense and append-only: `id == node_count()` at call time.
    pub fn insert(&mut self, id: u32, vectors: &EmbeddingStore) -> Result<()> {
        debug_assert_eq!(id as usize, self.node_count());
        let level = self.random_level();
        let budget = QueryBudget::unbounded();

        // First node becomes the entry point.
        let Some(entry_point) = self.entry_point else {
            self.neighbors.push(vec![Vec::new(); level + 1]);
            self.node_layers.push(level as u8);
            self.deleted.push(false);
            self.entry_point = Some(id);
            self.max_layer = level;
            return Ok(());
        };

        let query = vectors.row(id);
        let mut visited = VisitedSet::with_capacity(self.node_count() + 1);

        // Greedy descent from the top layer down to just above the node's level.
        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let nearest = search_layer(
                self,
                vectors,
                query,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
                &budget,
            )?;
            if let Some(&(_, nearest_id)) = nearest.first() {
                current = nearest_id;
            }
        }

        // Collect neighbors per layer from the node's level downwards.
        let top = level.min(self.max_layer);
        let mut per_layer: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut entry_points: Vec<u32> = vec![current];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vectors,
                query,
                &entry_points,
                self.ef_construction,
                layer,
                &mut visited,
                &budget,
            )?;
            let selected = select_neighbors(vectors, &candidates, self.max_degree(layer));
            per_layer[layer] = selected.iter().map(|&(_, id)| id).collect();

            entry_points.clear();
            entry_points.extend(candidates.iter().map(|&(_, id)| id));
            if entry_points.is_empty() {
                entry_points.push(entry_point);
            }
        }

        self.neighbors.push(per_layer);
        self.node_layers.push(level as u8);
        self.deleted.push(false);

        // Bidirectional links, pruning neighbors that exceed capacity.
        for layer in 0..=top {
            let max_degree = self.max_degree(layer);
            let own: Vec<u32> = self.neighbors[id as usize][layer].clone();
            for neighbor in own {
                let n_idx = neighbor as usize;
                while self.neighbors[n_idx].len() <= layer {
                    self.neighbors[n_idx].push(Vec::new());
                }
                self.neighbors[n_idx][layer].push(id);

                if self.neighbors[n_idx][layer].len() > max_degree {
                    let base = vectors.row(neighbor);
                    let ranked: Vec<(f32, u32)> = self.neighbors[n_idx][layer]
                        .iter()
                        .map(|&other| (cosine_distance(base, vectors.row(other)), other))
                        .collect();
                    let pruned = select_neighbors(vectors, &ranked, max_degree);
                    self.neighbors[n_idx][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }
}

/// Diversity heuristic (Algorithm 4 of the HNSW paper): keep a candidate only
/// if it is closer to the base node than to any already-kept neighbor, then
/// backfill remaining slots with the closest rejects. Keeps neighbor lists
/// spread out instead of clustered, which matters for cosine geometry.
fn select_neighbors(
    vectors: &EmbeddingStore,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    sorted.dedup_by_key(|c| c.1);

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, candidate) in &sorted {
        if selected.len() >= m {
            break;
        }
        let candidate_row = vectors.row(candidate);
        let diverse = selected.iter().all(|&(_, kept)| {
            dist_to_base <= cosine_distance(candidate_row, vectors.row(kept))
        });
        if diverse {
            selected.push((dist_to_base, candidate));
        }
    }

    if selected.len() < m {
        for &(dist, candidate) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, kept)| kept == candidate) {
                selected.push((dist, candidate));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnswParams;
    use crate::math::normalize;

    fn push_row(vectors: &mut EmbeddingStore, row: &[f32]) {
        let mut row = row.to_vec();
        normalize(&mut row);
        vectors.push(&row);
    }

    #[test]
    fn test_first_insert_sets_entry_point() {
        let mut graph = HnswGraph::new(&HnswParams::default());
        let mut vectors = EmbeddingStore::new(4);
        push_row(&mut vectors, &[1.0, 0.0, 0.0, 0.0]);
        graph.insert(0, &vectors).unwrap();
        assert_eq!(graph.entry_point, Some(0));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.live_count(), 1);
    }

    #[test]
    fn test_links_are_bidirectional_at_layer_zero() {
        let mut graph = HnswGraph::new(&HnswParams::default());
        let mut vectors = EmbeddingStore::new(4);
        push_row(&mut vectors, &[1.0, 0.0, 0.0, 0.0]);
        push_row(&mut vectors, &[0.9, 0.1, 0.0, 0.0]);
        graph.insert(0, &vectors).unwrap();
        graph.insert(1, &vectors).unwrap();
        assert!(graph.neighbors[0][0].contains(&1));
        assert!(graph.neighbors[1][0].contains(&0));
    }

    #[test]
    fn test_degree_bounds_hold() {
        let mut graph = HnswGraph::new(&HnswParams {
            m: 4,
            ef_construction: 32,
            ef_search: 32,
        });
        let mut vectors = EmbeddingStore::new(8);
        for i in 0..100u32 {
            let row: Vec<f32> = (0..8)
                .map(|j| (((i as usize * 13 + j * 7) % 89) as f32 / 89.0) - 0.5)
                .collect();
            push_row(&mut vectors, &row);
            graph.insert(i, &vectors).unwrap();
        }
        for (node, layers) in graph.neighbors.iter().enumerate() {
            for (layer, list) in layers.iter().enumerate() {
                let cap = graph.max_degree(layer);
                assert!(
                    list.len() <= cap,
                    "node {node} layer {layer}: {} > {cap}",
                    list.len()
                );
            }
        }
    }

    #[test]
    fn test_select_neighbors_dedups_and_caps() {
        let mut vectors = EmbeddingStore::new(2);
        push_row(&mut vectors, &[1.0, 0.0]);
        push_row(&mut vectors, &[0.0, 1.0]);
        push_row(&mut vectors, &[0.7, 0.7]);
        let candidates = vec![(0.1, 0), (0.1, 0), (0.2, 1), (0.3, 2)];
        let selected = select_neighbors(&vectors, &candidates, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].1, 0);
    }
}
