//! Public result and report containers for the engine surface.

use crate::document::AttributeBag;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One ranked search hit with its score decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// External document id.
    pub doc_id: String,
    /// Fused ranking score: `0.6·cos + 0.3·bm25 + 0.1·jac`.
    pub combined_score: f32,
    /// Cosine similarity component (clamped to be non-negative).
    pub cos: f32,
    /// Okapi BM25 component.
    pub bm25: f32,
    /// Exact Jaccard component.
    pub jac: f32,
    /// Attribute bag for hydration.
    pub metadata: Arc<AttributeBag>,
}

/// Outcome of a full index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    /// Documents successfully indexed.
    pub documents_processed: usize,
    /// Documents skipped due to per-document failures.
    pub failures: usize,
    /// Wall-clock build time.
    pub elapsed: Duration,
}

/// Acknowledgement of a mutation or persistence operation: the operation
/// succeeded (errors are carried by `Result`) and this is the generation the
/// engine is now serving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub generation: u64,
}

/// Lifecycle of one index generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    /// No build or load has completed; queries are rejected.
    Empty,
    /// A build is in progress; queries are rejected.
    Building,
    /// Serving reads; no mutations since the last build or load.
    Ready,
    /// Serving reads with incremental mutations applied.
    Mutating,
    /// Drift exceeded the threshold; a rebuild should run soon. Reads
    /// continue to be served.
    RebuildScheduled,
}

impl GenerationState {
    /// Whether queries may be served from this state.
    pub fn serves_reads(self) -> bool {
        matches!(
            self,
            GenerationState::Ready | GenerationState::Mutating | GenerationState::RebuildScheduled
        )
    }
}

/// Coarse health derived from the generation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but a rebuild is pending or the index is empty.
    Degraded,
}

/// Snapshot of engine health for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state: GenerationState,
    pub generation: u64,
    pub corpus_size: usize,
    pub tombstones: usize,
    pub pq_trained: bool,
    pub cache_size: usize,
    /// Duration of the last completed build, if any.
    pub last_build_ms: Option<u64>,
    pub uptime: Duration,
}
