//! The hybrid retrieval engine: build pipeline, query pipeline, incremental
//! mutations, and generation lifecycle.
//!
//! One [`SearchEngine`] owns every index structure behind a single
//! `parking_lot::RwLock`: queries take the read lock (many concurrent
//! readers, each seeing one consistent generation), mutations take the write
//! lock (one writer at a time). Embedding happens outside the lock — it is
//! the only suspension point on the query path.

use crate::budget::QueryBudget;
use crate::bm25::Bm25Index;
use crate::cache::{CacheKey, QueryCache};
use crate::config::{EngineConfig, MAX_RESULTS, PQ_MIN_TRAIN_SAMPLE};
use crate::document::Document;
use crate::embed::Embedder;
use crate::error::{EngineError, Result};
use crate::filters::FilterBag;
use crate::hnsw::{knn_search, HnswGraph};
use crate::incremental::DriftLedger;
use crate::lsh::LshIndex;
use crate::math::{dot, normalize};
use crate::persist::{self, Manifest, SnapshotWriter};
use crate::pq::ProductQuantizer;
use crate::stats::{EngineStats, MetricsSnapshot};
use crate::store::DocumentStore;
use crate::text::{canonical_text, query_token_set, token_set, tokenize};
use crate::types::{Ack, BuildReport, GenerationState, HealthReport, HealthStatus, SearchResult};
use crate::vectors::EmbeddingStore;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fusion weights. Conservative defaults: semantics dominate, exact lexical
/// overlap rescues short keyword queries.
const W_COSINE: f32 = 0.6;
const W_BM25: f32 = 0.3;
const W_JACCARD: f32 = 0.1;

/// Upper bound on scoring worker threads.
const MAX_SCORING_WORKERS: usize = 4;

/// All index structures of one generation, guarded together so a query
/// observes a single consistent snapshot.
struct EngineState {
    phase: GenerationState,
    generation: u64,
    store: DocumentStore,
    embeddings: EmbeddingStore,
    hnsw: HnswGraph,
    lsh: LshIndex,
    bm25: Bm25Index,
    pq: ProductQuantizer,
    drift: DriftLedger,
    last_build_ms: Option<u64>,
}

impl EngineState {
    fn empty(config: &EngineConfig) -> Self {
        Self {
            phase: GenerationState::Empty,
            generation: 0,
            store: DocumentStore::new(),
            embeddings: EmbeddingStore::new(config.embedding_dim),
            hnsw: HnswGraph::new(&config.hnsw),
            lsh: LshIndex::new(&config.lsh),
            bm25: Bm25Index::new(config.bm25),
            pq: ProductQuantizer::new(config.pq.clone()),
            drift: DriftLedger::new(),
            last_build_ms: None,
        }
    }

    fn manifest(&self, dimension: usize, config: &EngineConfig) -> Manifest {
        Manifest {
            generation: self.generation,
            dimension,
            document_count: self.store.len(),
            pq_m: config.pq.m,
            pq_k: config.pq.k,
            lsh_num_bands: config.lsh.num_bands,
            lsh_rows_per_band: config.lsh.rows_per_band,
        }
    }
}

/// In-process hybrid retrieval engine.
///
/// Construction owns the embedder; dropping the engine releases it. All
/// methods take `&self` and are safe to call from many threads.
pub struct SearchEngine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    state: RwLock<EngineState>,
    cache: QueryCache,
    stats: EngineStats,
    started_at: Instant,
}

impl SearchEngine {
    pub fn new(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate().map_err(EngineError::Validation)?;
        if config.embedding_dim % config.pq.m != 0 {
            return Err(EngineError::Validation(format!(
                "embedding_dim {} is not divisible by pq.m {}",
                config.embedding_dim, config.pq.m
            )));
        }
        if embedder.dimension() != config.embedding_dim {
            return Err(EngineError::Validation(format!(
                "embedder dimension {} does not match embedding_dim {}",
                embedder.dimension(),
                config.embedding_dim
            )));
        }
        let state = EngineState::empty(&config);
        Ok(Self {
            cache: QueryCache::new(config.cache_max_size),
            config,
            embedder,
            state: RwLock::new(state),
            stats: EngineStats::new(),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Build pipeline ─────────────────────────────────────────────────

    /// Build every index from scratch over a document batch.
    ///
    /// Documents whose embedding is malformed are skipped and counted; the
    /// batch succeeds if at least one document was indexed. The new
    /// generation replaces the old one only after the whole pipeline —
    /// including the snapshot, when `index_path` is set — has succeeded, so
    /// a failed build leaves the previous generation serving.
    pub fn build_indexes(&self, documents: &[Document]) -> Result<BuildReport> {
        let started = Instant::now();
        if documents.is_empty() {
            self.stats.record_build_error();
            return Err(EngineError::Validation(
                "cannot build indexes from an empty document batch".into(),
            ));
        }

        let prior_phase = {
            let mut state = self.state.write();
            let prior = state.phase;
            state.phase = GenerationState::Building;
            prior
        };

        match self.build_state(documents, started) {
            Ok((new_state, report)) => {
                {
                    let mut state = self.state.write();
                    *state = new_state;
                }
                self.cache.invalidate_all();
                self.stats
                    .record_build(started.elapsed().as_secs_f64(), report.failures as u64);
                tracing::info!(
                    documents = report.documents_processed,
                    failures = report.failures,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "index build completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.state.write().phase = prior_phase;
                self.stats.record_build_error();
                Err(e)
            }
        }
    }

    fn build_state(
        &self,
        documents: &[Document],
        started: Instant,
    ) -> Result<(EngineState, BuildReport)> {
        let dim = self.config.embedding_dim;

        // Deduplicate by id (last occurrence wins), then order by id so
        // insertion — and therefore the graph — is stable across builds.
        let mut by_id: BTreeMap<&str, &Document> = BTreeMap::new();
        for doc in documents {
            by_id.insert(doc.id.as_str(), doc);
        }
        let ordered: Vec<&Document> = by_id.into_values().collect();

        let texts: Vec<String> = ordered.iter().map(|d| canonical_text(d)).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let rows = self.embedder.encode(&text_refs)?;
        if rows.len() != ordered.len() {
            return Err(EngineError::Embedding(format!(
                "embedder returned {} rows for {} texts",
                rows.len(),
                ordered.len()
            )));
        }

        let generation = self.state.read().generation + 1;
        let mut state = EngineState::empty(&self.config);
        let mut failures = 0usize;

        for (doc, row) in ordered.iter().zip(rows) {
            if row.len() != dim || row.iter().any(|x| !x.is_finite()) {
                failures += 1;
                tracing::warn!(doc_id = %doc.id, "skipping document with malformed embedding");
                continue;
            }
            let mut row = row;
            normalize(&mut row);

            let text = canonical_text(doc);
            let internal = state.store.insert(&doc.id, doc.attributes.clone());
            state.embeddings.push(&row);
            state.bm25.add(internal, tokenize(&text).iter());
            state.lsh.add(internal, token_set(doc));
            state.hnsw.insert(internal, &state.embeddings)?;
        }

        if state.store.is_empty() {
            return Err(EngineError::Embedding(
                "no document in the batch produced a usable embedding".into(),
            ));
        }

        // Train PQ on a uniform sample and encode every vector.
        train_and_encode_pq(&mut state, &self.config)?;

        state.generation = generation;
        state.phase = GenerationState::Ready;
        state.last_build_ms = Some(started.elapsed().as_millis() as u64);

        if let Some(base) = &self.config.index_path {
            persist::save(
                base,
                SnapshotWriter {
                    manifest: state.manifest(dim, &self.config),
                    hnsw: &state.hnsw,
                    lsh: &state.lsh,
                    bm25: &state.bm25,
                    pq: &state.pq,
                    embeddings: &state.embeddings,
                    store: &state.store,
                },
            )?;
        }

        let report = BuildReport {
            documents_processed: state.store.len(),
            failures,
            elapsed: started.elapsed(),
        };
        Ok((state, report))
    }

    // ── Query pipeline ─────────────────────────────────────────────────

    /// Ranked hybrid search with the configured default deadline.
    pub fn search(
        &self,
        query: &str,
        num_results: usize,
        filters: Option<&FilterBag>,
        ef_search: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let budget = QueryBudget::with_deadline(Duration::from_millis(self.config.query_deadline_ms));
        self.search_with_budget(query, num_results, filters, ef_search, &budget)
    }

    /// Ranked hybrid search under an explicit deadline/cancellation budget.
    pub fn search_with_budget(
        &self,
        query: &str,
        num_results: usize,
        filters: Option<&FilterBag>,
        ef_search: Option<usize>,
        budget: &QueryBudget,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        if query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }
        if num_results == 0 || num_results > MAX_RESULTS {
            return Err(EngineError::Validation(format!(
                "num_results must be between 1 and {MAX_RESULTS}, got {num_results}"
            )));
        }

        let ef = ef_search.unwrap_or(self.config.hnsw.ef_search).max(num_results);
        let key = CacheKey {
            query: query.to_string(),
            k: num_results,
            filter_fingerprint: filters.map(FilterBag::fingerprint).unwrap_or_default(),
            ef_search: ef,
        };
        if let Some(hit) = self.cache.get(&key) {
            self.stats.record_cache_hit();
            tracing::debug!(query_len = query.len(), "query cache hit");
            return Ok(hit.as_ref().clone());
        }

        // Suspension point: embed outside the lock.
        let mut query_vec = self.embed_single(query)?;
        normalize(&mut query_vec);
        let query_tokens = query_token_set(query);

        let results = {
            let state = self.state.read();
            if !state.phase.serves_reads() {
                return Err(EngineError::IndexNotReady);
            }
            budget.check()?;

            // Candidate union: ANN neighbors ∪ LSH band collisions.
            let mut candidates: HashSet<u32> = state
                .lsh
                .candidates(&query_tokens)
                .into_iter()
                .filter(|&id| state.store.is_live(id))
                .collect();
            for (id, _) in knn_search(&state.hnsw, &state.embeddings, &query_vec, ef, ef, budget)? {
                candidates.insert(id);
            }

            // Filter predicates and tombstones before any scoring work.
            let survivors: Vec<u32> = candidates
                .into_iter()
                .filter(|&id| state.store.is_live(id))
                .filter(|&id| match (filters, state.store.attributes(id)) {
                    (None, _) => true,
                    (Some(bag), Some(attrs)) => bag.matches(attrs),
                    (Some(_), None) => false,
                })
                .collect();

            score_candidates(
                &state,
                &query_vec,
                &query_tokens,
                &survivors,
                num_results,
                budget,
            )?
        };

        let results = Arc::new(results);
        self.cache.put(key, Arc::clone(&results));
        self.stats
            .record_search(started.elapsed().as_secs_f64() * 1_000.0);
        Ok(results.as_ref().clone())
    }

    fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut rows = self.embedder.encode(&[text])?;
        if rows.len() != 1 {
            return Err(EngineError::Embedding(format!(
                "embedder returned {} rows for a single query",
                rows.len()
            )));
        }
        let row = rows.pop().expect("length checked above");
        if row.len() != self.config.embedding_dim || row.iter().any(|x| !x.is_finite()) {
            return Err(EngineError::Embedding(
                "embedder returned a malformed query vector".into(),
            ));
        }
        Ok(row)
    }

    // ── Incremental mutations ──────────────────────────────────────────

    /// Insert a document, replacing any live document with the same id.
    pub fn add_document(&self, doc: &Document) -> Result<Ack> {
        let mut vector = self.embed_single(&canonical_text(doc))?;
        normalize(&mut vector);

        let mut state = self.state.write();
        if !state.phase.serves_reads() {
            return Err(EngineError::IndexNotReady);
        }
        self.upsert_locked(&mut state, doc, &vector)?;
        self.finish_mutation(&mut state);
        Ok(Ack {
            generation: state.generation,
        })
    }

    /// Replace a document: observationally equivalent to delete then add.
    /// Unknown ids degrade to a plain add.
    pub fn update_document(&self, doc_id: &str, doc: &Document) -> Result<Ack> {
        let mut vector = self.embed_single(&canonical_text(doc))?;
        normalize(&mut vector);

        let mut state = self.state.write();
        if !state.phase.serves_reads() {
            return Err(EngineError::IndexNotReady);
        }
        if doc_id != doc.id {
            Self::tombstone_locked(&mut state, doc_id);
        }
        self.upsert_locked(&mut state, doc, &vector)?;
        self.finish_mutation(&mut state);
        Ok(Ack {
            generation: state.generation,
        })
    }

    /// Tombstone a document everywhere. Unknown ids are a Validation error.
    pub fn delete_document(&self, doc_id: &str) -> Result<Ack> {
        let mut state = self.state.write();
        if !state.phase.serves_reads() {
            return Err(EngineError::IndexNotReady);
        }
        if !Self::tombstone_locked(&mut state, doc_id) {
            return Err(EngineError::Validation(format!(
                "unknown document id: {doc_id}"
            )));
        }
        self.finish_mutation(&mut state);
        Ok(Ack {
            generation: state.generation,
        })
    }

    fn upsert_locked(&self, state: &mut EngineState, doc: &Document, vector: &[f32]) -> Result<()> {
        Self::tombstone_locked(state, &doc.id);

        let text = canonical_text(doc);
        let internal = state.store.insert(&doc.id, doc.attributes.clone());
        state.embeddings.push(vector);
        state.bm25.add(internal, tokenize(&text).iter());
        state.lsh.add(internal, token_set(doc));
        state.hnsw.insert(internal, &state.embeddings)?;
        if state.pq.is_trained() {
            state.pq.encode_and_store(internal, vector)?;
        }
        state.drift.record_add(internal);
        Ok(())
    }

    /// Remove a live document from every structure. Returns `false` when the
    /// id is unknown.
    fn tombstone_locked(state: &mut EngineState, doc_id: &str) -> bool {
        let Some(internal) = state.store.remove(doc_id) else {
            return false;
        };
        state.hnsw.mark_deleted(internal);
        state.bm25.remove(internal);
        state.lsh.remove(internal);
        state.pq.remove(internal);
        state.drift.record_delete(internal);
        true
    }

    /// Common mutation epilogue: bump the generation, invalidate the cache,
    /// advance the state machine, and check the rebuild trigger.
    fn finish_mutation(&self, state: &mut EngineState) {
        state.generation += 1;
        if state.phase == GenerationState::Ready {
            state.phase = GenerationState::Mutating;
        }
        self.cache.invalidate_all();
        Self::check_drift(state, &self.config);
    }

    fn check_drift(state: &mut EngineState, config: &EngineConfig) {
        if state.phase != GenerationState::RebuildScheduled
            && state.drift.should_rebuild(
                state.store.len(),
                config.drift_absolute,
                config.drift_fraction,
            )
        {
            state.phase = GenerationState::RebuildScheduled;
            tracing::info!(
                tombstones = state.drift.tombstones(),
                updates = state.drift.updates_since_build(),
                corpus_size = state.store.len(),
                "rebuild scheduled: mutation drift exceeded threshold"
            );
        }
    }

    /// Re-evaluate the drift trigger. Returns `true` when a rebuild is due.
    pub fn maybe_rebuild(&self) -> bool {
        let mut state = self.state.write();
        Self::check_drift(&mut state, &self.config);
        state.phase == GenerationState::RebuildScheduled
    }

    /// Compact the current generation: drop tombstones, reassign dense ids,
    /// retrain PQ, and rebuild the graph from the stored embeddings. No
    /// re-embedding happens — the arena is the source of truth. The new
    /// generation is committed only after everything, including the snapshot
    /// when `index_path` is set, has succeeded.
    pub fn rebuild(&self) -> Result<Ack> {
        let started = Instant::now();
        let mut state = self.state.write();
        if !state.phase.serves_reads() {
            return Err(EngineError::IndexNotReady);
        }
        let prior_phase = state.phase;
        state.phase = GenerationState::Building;

        match self.rebuild_state(&state, started) {
            Ok(new_state) => {
                *state = new_state;
                self.cache.invalidate_all();
                tracing::info!(
                    generation = state.generation,
                    documents = state.store.len(),
                    "rebuild completed"
                );
                Ok(Ack {
                    generation: state.generation,
                })
            }
            Err(e) => {
                state.phase = prior_phase;
                Err(e)
            }
        }
    }

    fn rebuild_state(&self, state: &EngineState, started: Instant) -> Result<EngineState> {
        let mut live: Vec<(u32, String)> = state
            .store
            .live()
            .map(|(id, ext)| (id, ext.to_string()))
            .collect();
        live.sort_by(|a, b| a.1.cmp(&b.1));

        let mut rebuilt = EngineState::empty(&self.config);
        let mut mapping = std::collections::HashMap::new();

        for (old_internal, external) in &live {
            let attrs = state
                .store
                .attributes(*old_internal)
                .map(|a| a.as_ref().clone())
                .unwrap_or_default();
            let new_internal = rebuilt.store.insert(external, attrs);
            rebuilt.embeddings.push(state.embeddings.row(*old_internal));
            rebuilt.hnsw.insert(new_internal, &rebuilt.embeddings)?;
            if let Some(tokens) = state.lsh.tokens(*old_internal) {
                rebuilt.lsh.add(new_internal, tokens.clone());
            }
            mapping.insert(*old_internal, new_internal);
        }
        rebuilt.bm25 = state.bm25.remap(&mapping);
        train_and_encode_pq(&mut rebuilt, &self.config)?;

        rebuilt.generation = state.generation + 1;
        rebuilt.phase = GenerationState::Ready;
        rebuilt.last_build_ms = Some(started.elapsed().as_millis() as u64);

        if let Some(base) = &self.config.index_path {
            persist::save(
                base,
                SnapshotWriter {
                    manifest: rebuilt.manifest(self.config.embedding_dim, &self.config),
                    hnsw: &rebuilt.hnsw,
                    lsh: &rebuilt.lsh,
                    bm25: &rebuilt.bm25,
                    pq: &rebuilt.pq,
                    embeddings: &rebuilt.embeddings,
                    store: &rebuilt.store,
                },
            )?;
        }
        Ok(rebuilt)
    }

    // ── Persistence ────────────────────────────────────────────────────

    /// Snapshot the current generation into `base`.
    pub fn snapshot(&self, base: &Path) -> Result<Ack> {
        let state = self.state.read();
        if !state.phase.serves_reads() {
            return Err(EngineError::IndexNotReady);
        }
        persist::save(
            base,
            SnapshotWriter {
                manifest: state.manifest(self.config.embedding_dim, &self.config),
                hnsw: &state.hnsw,
                lsh: &state.lsh,
                bm25: &state.bm25,
                pq: &state.pq,
                embeddings: &state.embeddings,
                store: &state.store,
            },
        )?;
        Ok(Ack {
            generation: state.generation,
        })
    }

    /// Load the newest usable generation from `base`. Only valid on an empty
    /// engine: the state machine moves `Empty → Ready` directly.
    pub fn load(&self, base: &Path) -> Result<Ack> {
        let snapshot = persist::load_latest(base)?.ok_or_else(|| {
            EngineError::Corrupt(format!(
                "no usable snapshot under {}; a rebuild is required",
                base.display()
            ))
        })?;
        if snapshot.manifest.dimension != self.config.embedding_dim {
            return Err(EngineError::Validation(format!(
                "snapshot dimension {} does not match configured embedding_dim {}",
                snapshot.manifest.dimension, self.config.embedding_dim
            )));
        }

        let mut state = self.state.write();
        if state.phase != GenerationState::Empty {
            return Err(EngineError::Validation(
                "load requires an empty engine; this one already has a generation".into(),
            ));
        }
        state.store = snapshot.store;
        state.embeddings = snapshot.embeddings;
        state.hnsw = snapshot.hnsw;
        state.lsh = snapshot.lsh;
        state.bm25 = snapshot.bm25;
        state.pq = snapshot.pq;
        state.generation = snapshot.manifest.generation;
        state.phase = GenerationState::Ready;
        Ok(Ack {
            generation: state.generation,
        })
    }

    // ── Introspection ──────────────────────────────────────────────────

    pub fn health(&self) -> HealthReport {
        let state = self.state.read();
        let status = match state.phase {
            GenerationState::Ready | GenerationState::Mutating => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };
        HealthReport {
            status,
            state: state.phase,
            generation: state.generation,
            corpus_size: state.store.len(),
            tombstones: state.hnsw.tombstone_count(),
            pq_trained: state.pq.is_trained(),
            cache_size: self.cache.len(),
            last_build_ms: state.last_build_ms,
            uptime: self.started_at.elapsed(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let state = self.state.read();
        let mut gauges = BTreeMap::new();
        gauges.insert("corpus_size".to_string(), state.store.len() as f64);
        gauges.insert(
            "tombstones".to_string(),
            state.hnsw.tombstone_count() as f64,
        );
        gauges.insert("generation".to_string(), state.generation as f64);
        gauges.insert("cache_size".to_string(), self.cache.len() as f64);
        drop(state);
        self.stats.snapshot(gauges)
    }
}

/// Uniform-stride PQ training sample, target `max(K·40, 10_000)` vectors.
fn train_and_encode_pq(state: &mut EngineState, config: &EngineConfig) -> Result<()> {
    let n = state.embeddings.len();
    if n == 0 {
        return Ok(());
    }
    let dim = config.embedding_dim;
    let target = (config.pq.k * 40).max(PQ_MIN_TRAIN_SAMPLE).min(n);
    let stride = (n / target).max(1);

    let mut sample = Vec::with_capacity(target * dim);
    let mut taken = 0usize;
    let mut i = 0usize;
    while taken < target && i < n {
        sample.extend_from_slice(state.embeddings.row(i as u32));
        taken += 1;
        i += stride;
    }
    state.pq.train(&sample, dim)?;
    for id in 0..n as u32 {
        if state.store.is_live(id) {
            state.pq.encode_and_store(id, state.embeddings.row(id))?;
        }
    }
    Ok(())
}

/// Scored candidate before hydration.
struct Scored {
    internal: u32,
    external: String,
    cos: f32,
    bm25: f32,
    jac: f32,
    combined: f32,
}

/// Score candidates on a small worker pool and merge into a bounded top-k
/// heap. Per-candidate failures (e.g. an arena row missing for a corrupted
/// entry) drop that candidate rather than failing the query.
fn score_candidates(
    state: &EngineState,
    query_vec: &[f32],
    query_tokens: &HashSet<String>,
    candidates: &[u32],
    k: usize,
    budget: &QueryBudget,
) -> Result<Vec<SearchResult>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let workers = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .min(MAX_SCORING_WORKERS)
        .min(candidates.len());

    let cursor = AtomicUsize::new(0);
    let interrupted = AtomicBool::new(false);
    let collected: parking_lot::Mutex<Vec<Scored>> =
        parking_lot::Mutex::new(Vec::with_capacity(candidates.len()));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let mut local: Vec<Scored> = Vec::new();
                loop {
                    if interrupted.load(Ordering::Relaxed) {
                        break;
                    }
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    if i >= candidates.len() {
                        break;
                    }
                    if budget.check().is_err() {
                        interrupted.store(true, Ordering::Relaxed);
                        break;
                    }
                    if let Some(scored) = score_one(state, query_vec, query_tokens, candidates[i]) {
                        local.push(scored);
                    }
                }
                collected.lock().extend(local);
            });
        }
    });

    if interrupted.load(Ordering::Relaxed) {
        budget.check()?;
    }

    // Bounded top-k selection; ties evict the lexicographically larger id so
    // equal scores rank by doc id ascending.
    let scored = collected.into_inner();
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<String>, u32)>> =
        BinaryHeap::with_capacity(k + 1);
    for s in &scored {
        heap.push(Reverse((
            OrderedFloat(s.combined),
            Reverse(s.external.clone()),
            s.internal,
        )));
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut top: Vec<(f32, String, u32)> = heap
        .into_iter()
        .map(|Reverse((OrderedFloat(score), Reverse(external), internal))| {
            (score, external, internal)
        })
        .collect();
    top.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let by_internal: std::collections::HashMap<u32, &Scored> =
        scored.iter().map(|s| (s.internal, s)).collect();
    Ok(top
        .into_iter()
        .filter_map(|(_, _, internal)| {
            let s = by_internal.get(&internal)?;
            let metadata = state.store.attributes(internal)?;
            Some(SearchResult {
                doc_id: s.external.clone(),
                combined_score: s.combined,
                cos: s.cos,
                bm25: s.bm25,
                jac: s.jac,
                metadata: Arc::clone(metadata),
            })
        })
        .collect())
}

fn score_one(
    state: &EngineState,
    query_vec: &[f32],
    query_tokens: &HashSet<String>,
    internal: u32,
) -> Option<Scored> {
    if internal as usize >= state.embeddings.len() {
        tracing::debug!(internal, "dropping candidate without an embedding row");
        return None;
    }
    let external = state.store.external_id(internal)?.to_string();

    // Vectors are unit-normalized, so cosine is a dot product. Clamped at
    // zero to keep the fused score monotone and non-negative.
    let cos = dot(query_vec, state.embeddings.row(internal)).max(0.0);
    let bm25 = state.bm25.score(query_tokens.iter().map(String::as_str), internal);
    let jac = state.lsh.jaccard(query_tokens, internal);
    let combined = W_COSINE * cos + W_BM25 * bm25 + W_JACCARD * jac;

    Some(Scored {
        internal,
        external,
        cos,
        bm25,
        jac,
        combined,
    })
}
