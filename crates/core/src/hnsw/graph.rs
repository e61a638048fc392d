//! HNSW graph structure: neighbor lists, layer assignments, tombstones.

use crate::config::{HnswParams, HNSW_MAX_LAYERS};
use serde::{Deserialize, Serialize};

/// Multi-layer navigable small-world graph.
///
/// Struct-of-arrays layout indexed by internal node id: `neighbors[node]`
/// holds one adjacency list per layer the node participates in. Node ids are
/// assigned densely in insertion order and match rows in the embedding arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    /// Base out-degree; layer 0 allows `2 * m`.
    pub(crate) m: usize,
    pub(crate) m_max0: usize,
    pub(crate) ef_construction: usize,
    /// `neighbors[node_id][layer]` → neighbor ids.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer of each node.
    pub(crate) node_layers: Vec<u8>,
    /// Tombstones: deleted nodes keep their links for navigation but are
    /// excluded from results.
    pub(crate) deleted: Vec<bool>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
}

impl HnswGraph {
    pub fn new(params: &HnswParams) -> Self {
        Self {
            m: params.m,
            m_max0: params.m * 2,
            ef_construction: params.ef_construction,
            neighbors: Vec::new(),
            node_layers: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Total nodes including tombstones.
    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Live (non-tombstoned) node count.
    pub fn live_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    /// Tombstoned node count.
    pub fn tombstone_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| d).count()
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Tombstone a node. Links stay intact so the graph remains navigable.
    /// Returns `false` for out-of-range ids.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        match self.deleted.get_mut(id as usize) {
            Some(slot) => {
                *slot = true;
                true
            }
            None => false,
        }
    }

    /// Sample a level from the geometric distribution with parameter
    /// `1 / ln(m)`, capped at the layer limit.
    pub(crate) fn random_level(&self) -> usize {
        let ml = 1.0 / (self.m as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(HNSW_MAX_LAYERS - 1)
    }

    /// Max out-degree at a layer.
    #[inline]
    pub(crate) fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> HnswGraph {
        HnswGraph::new(&HnswParams::default())
    }

    #[test]
    fn test_new_graph_is_empty() {
        let g = graph();
        assert!(g.is_empty());
        assert_eq!(g.node_count(), 0);
        assert!(g.entry_point.is_none());
    }

    #[test]
    fn test_random_level_respects_cap() {
        let g = graph();
        for _ in 0..1000 {
            assert!(g.random_level() < HNSW_MAX_LAYERS);
        }
    }

    #[test]
    fn test_mark_deleted_bounds() {
        let mut g = graph();
        g.neighbors.push(vec![Vec::new()]);
        g.node_layers.push(0);
        g.deleted.push(false);
        assert!(g.mark_deleted(0));
        assert!(g.is_deleted(0));
        assert_eq!(g.live_count(), 0);
        assert_eq!(g.tombstone_count(), 1);
        assert!(!g.mark_deleted(5));
    }

    #[test]
    fn test_max_degree() {
        let g = graph();
        assert_eq!(g.max_degree(0), 32);
        assert_eq!(g.max_degree(1), 16);
    }
}
