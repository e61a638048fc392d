//! Engine configuration: tuning parameters, validation limits, and defaults.
//!
//! All defaults are defined as constants here. Runtime configuration is a
//! plain [`EngineConfig`] value handed to the engine at construction; loading
//! it from files or environment variables is the embedding application's job.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default embedding dimension (matches common sentence-transformer models).
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// BM25 Okapi term frequency saturation parameter.
///
/// Controls how quickly term frequency saturates. Higher values allow TF to
/// grow more. Typical range: 1.0–2.0.
pub const BM25_DEFAULT_K1: f32 = 1.5;

/// BM25 Okapi document length normalization parameter.
///
/// 0.0 = no normalization, 1.0 = full normalization.
pub const BM25_DEFAULT_B: f32 = 0.75;

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default candidate list size during HNSW construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate list size during HNSW search.
///
/// Higher values improve recall at the cost of latency. Clamped to at least
/// the requested `k` at query time.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 200;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Default number of LSH bands.
pub const LSH_DEFAULT_NUM_BANDS: usize = 16;

/// Default number of MinHash rows per LSH band.
///
/// Total signature length is `num_bands * rows_per_band`.
pub const LSH_DEFAULT_ROWS_PER_BAND: usize = 8;

/// Default number of PQ subspaces. Must divide the embedding dimension.
pub const PQ_DEFAULT_SUBSPACES: usize = 8;

/// Number of PQ centroids per subspace. 256 centroids = 8-bit codes.
pub const PQ_DEFAULT_CENTROIDS: usize = 256;

/// Number of k-means refinement iterations during PQ training.
pub const PQ_KMEANS_ITERATIONS: usize = 15;

/// Minimum PQ training sample target: `max(K * 40, PQ_MIN_TRAIN_SAMPLE)`,
/// capped at the corpus size.
pub const PQ_MIN_TRAIN_SAMPLE: usize = 10_000;

/// Maximum number of results (`k`) per search request.
pub const MAX_RESULTS: usize = 1_000;

/// Default bound on the number of cached query results.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1_000;

/// Default hard query deadline in milliseconds.
pub const DEFAULT_QUERY_DEADLINE_MS: u64 = 2_000;

/// Absolute mutation-drift threshold that schedules a rebuild.
pub const DEFAULT_DRIFT_ABSOLUTE: u64 = 10_000;

/// Fractional mutation-drift threshold (relative to corpus size).
pub const DEFAULT_DRIFT_FRACTION: f64 = 0.1;

/// HNSW graph tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Bidirectional links per node (layer 0 uses `2 * m`).
    pub m: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Default candidate list size during search; overridable per query.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: HNSW_DEFAULT_M,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: HNSW_DEFAULT_EF_SEARCH,
        }
    }
}

/// Product quantizer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqParams {
    /// Number of subspaces (code length in bytes). Must divide the dimension.
    pub m: usize,
    /// Centroids per subspace. Must be ≤ 256 to fit u8 codes.
    pub k: usize,
}

impl Default for PqParams {
    fn default() -> Self {
        Self {
            m: PQ_DEFAULT_SUBSPACES,
            k: PQ_DEFAULT_CENTROIDS,
        }
    }
}

/// MinHash LSH parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LshParams {
    pub num_bands: usize,
    pub rows_per_band: usize,
}

impl Default for LshParams {
    fn default() -> Self {
        Self {
            num_bands: LSH_DEFAULT_NUM_BANDS,
            rows_per_band: LSH_DEFAULT_ROWS_PER_BAND,
        }
    }
}

/// BM25 Okapi parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: BM25_DEFAULT_K1,
            b: BM25_DEFAULT_B,
        }
    }
}

/// Full engine configuration.
///
/// Changing `embedding_dim` invalidates every index and requires a rebuild;
/// the other knobs take effect on the next build or query as noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fixed width of every embedding vector.
    pub embedding_dim: usize,
    /// Routed to the embedder implementation; the engine itself is CPU-only.
    pub use_gpu: bool,
    /// Snapshot directory. `None` disables automatic persistence after builds.
    pub index_path: Option<PathBuf>,
    /// LRU bound on the query result cache.
    pub cache_max_size: usize,
    pub hnsw: HnswParams,
    pub pq: PqParams,
    pub lsh: LshParams,
    pub bm25: Bm25Params,
    /// Absolute drift threshold for scheduling a rebuild.
    pub drift_absolute: u64,
    /// Fractional drift threshold (relative to corpus size).
    pub drift_fraction: f64,
    /// Hard per-query deadline in milliseconds.
    pub query_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            use_gpu: false,
            index_path: None,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            hnsw: HnswParams::default(),
            pq: PqParams::default(),
            lsh: LshParams::default(),
            bm25: Bm25Params::default(),
            drift_absolute: DEFAULT_DRIFT_ABSOLUTE,
            drift_fraction: DEFAULT_DRIFT_FRACTION,
            query_deadline_ms: DEFAULT_QUERY_DEADLINE_MS,
        }
    }
}

impl EngineConfig {
    /// Check structural constraints that would otherwise surface as obscure
    /// failures deep inside the index builders.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding_dim == 0 {
            return Err("embedding_dim must be > 0".into());
        }
        if self.hnsw.m < 2 {
            return Err("hnsw.m must be >= 2".into());
        }
        if self.pq.m == 0 || self.pq.k == 0 || self.pq.k > 256 {
            return Err("pq.m must be > 0 and pq.k in 1..=256".into());
        }
        if self.lsh.num_bands == 0 || self.lsh.rows_per_band == 0 {
            return Err("lsh.num_bands and lsh.rows_per_band must be > 0".into());
        }
        if self.cache_max_size == 0 {
            return Err("cache_max_size must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.drift_fraction) {
            return Err("drift_fraction must be in [0, 1]".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let cfg = EngineConfig {
            embedding_dim: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_oversized_pq_k_rejected() {
        let cfg = EngineConfig {
            pq: PqParams { m: 8, k: 512 },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected_on_deserialize() {
        let raw = r#"{"embedding_dim": 128, "no_such_option": true}"#;
        let parsed: Result<EngineConfig, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }
}
