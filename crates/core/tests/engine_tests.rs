//! End-to-end scenarios driving the public engine surface with the
//! deterministic bag-of-words embedder.

use std::sync::Arc;
use trident_core::budget::{CancelToken, QueryBudget};
use trident_core::config::{EngineConfig, PqParams};
use trident_core::document::{AttributeValue, Document};
use trident_core::embed::HashedBowEmbedder;
use trident_core::engine::SearchEngine;
use trident_core::error::EngineError;
use trident_core::filters::FilterBag;

const DIM: usize = 128;

fn engine_with(index_path: Option<std::path::PathBuf>) -> SearchEngine {
    let config = EngineConfig {
        embedding_dim: DIM,
        pq: PqParams { m: 8, k: 256 },
        index_path,
        ..Default::default()
    };
    SearchEngine::new(config, Arc::new(HashedBowEmbedder::new(DIM))).unwrap()
}

fn engine() -> SearchEngine {
    engine_with(None)
}

fn resume_corpus() -> Vec<Document> {
    vec![
        Document::new("d1", "python developer with aws experience").with_attribute(
            "skills",
            AttributeValue::StringList(vec!["python".into(), "aws".into()]),
        ),
        Document::new("d2", "java backend engineer kubernetes").with_attribute(
            "skills",
            AttributeValue::StringList(vec!["java".into(), "kubernetes".into()]),
        ),
        Document::new("d3", "senior python data scientist").with_attribute(
            "skills",
            AttributeValue::StringList(vec!["python".into()]),
        ),
    ]
}

/// Scenario 1: fused ranking over a three-document corpus.
#[test]
fn fusion_ranks_keyword_overlap_first() {
    let engine = engine();
    engine.build_indexes(&resume_corpus()).unwrap();

    let results = engine.search("python aws", 3, None, None).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["d1", "d3", "d2"]);
    assert!(
        results[0].combined_score > results[1].combined_score,
        "d1 must strictly outscore d3"
    );
}

/// Scenario 2: a required-skills filter narrows the result set.
#[test]
fn required_skills_filter_selects_only_matching_docs() {
    let engine = engine();
    engine.build_indexes(&resume_corpus()).unwrap();

    let filter = FilterBag {
        required_skills: Some(["kubernetes".to_string()].into()),
        ..Default::default()
    };
    let results = engine.search("python aws", 3, Some(&filter), None).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["d2"]);
}

/// Scenario 3: incremental add then delete.
#[test]
fn add_then_delete_changes_result_membership() {
    let engine = engine();
    engine.build_indexes(&resume_corpus()).unwrap();

    engine
        .add_document(&Document::new("d4", "aws devops engineer"))
        .unwrap();
    let results = engine.search("aws", 2, None, None).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert!(ids.contains(&"d4"));
    assert!(ids.contains(&"d1"));
    assert!(!ids.contains(&"d3"));

    engine.delete_document("d4").unwrap();
    let results = engine.search("aws", 10, None, None).unwrap();
    assert!(results.iter().all(|r| r.doc_id != "d4"));
}

fn synthetic_corpus(n: usize) -> Vec<Document> {
    let vocab = [
        "python", "java", "rust", "golang", "aws", "gcp", "azure", "kubernetes", "docker",
        "terraform", "react", "postgres", "kafka", "spark", "pytorch", "django", "flask",
        "backend", "frontend", "devops", "data", "scientist", "engineer", "architect",
    ];
    (0..n)
        .map(|i| {
            let words: Vec<&str> = (0..6)
                .map(|j| vocab[(i * 7 + j * 13 + i * j) % vocab.len()])
                .collect();
            Document::new(format!("doc-{i:04}"), words.join(" ")).with_attribute(
                "experience_years",
                AttributeValue::Integer((i % 20) as i64),
            )
        })
        .collect()
}

/// Scenario 4: snapshot → fresh engine → load reproduces top-5 exactly.
#[test]
fn snapshot_load_reproduces_rankings() {
    let dir = tempfile::tempdir().unwrap();
    let engine_a = engine();
    engine_a.build_indexes(&synthetic_corpus(1_000)).unwrap();
    engine_a.snapshot(dir.path()).unwrap();

    let engine_b = engine();
    engine_b.load(dir.path()).unwrap();
    assert_eq!(engine_b.health().corpus_size, 1_000);

    let queries = [
        "python aws engineer",
        "rust backend",
        "kubernetes devops terraform",
        "data scientist pytorch",
        "java kafka",
        "react frontend",
        "golang docker",
        "postgres architect",
        "spark data",
        "azure gcp cloud",
    ];
    for query in queries {
        let a: Vec<String> = engine_a
            .search(query, 5, None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc_id)
            .collect();
        let b: Vec<String> = engine_b
            .search(query, 5, None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc_id)
            .collect();
        assert_eq!(a, b, "top-5 diverged for query {query:?}");
    }
}

/// Scenario 5: num_results = 0 is a Validation error and counts no query.
#[test]
fn zero_results_requested_is_validation_error() {
    let engine = engine();
    engine.build_indexes(&resume_corpus()).unwrap();

    let err = engine.search("python", 0, None, None);
    assert!(matches!(err, Err(EngineError::Validation(_))));
    let snap = engine.metrics();
    assert_eq!(snap.counters["search_queries_total"], 0);
}

/// Scenario 6: cancelled search fails; the retry completes and is cached.
#[test]
fn cancelled_search_then_successful_cached_retry() {
    let engine = engine();
    engine.build_indexes(&synthetic_corpus(500)).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let budget = QueryBudget::unbounded().with_cancel(token);
    let err = engine.search_with_budget("python aws", 5, None, None, &budget);
    assert!(matches!(err, Err(EngineError::Cancelled)));

    let results = engine.search("python aws", 5, None, None).unwrap();
    assert!(!results.is_empty());

    // Identical query now hits the cache.
    engine.search("python aws", 5, None, None).unwrap();
    assert_eq!(engine.metrics().counters["search_cache_hits_total"], 1);
}

#[test]
fn update_is_observationally_delete_then_add() {
    let corpus = resume_corpus();
    let replacement = Document::new("d2", "python machine learning engineer aws");

    // Engine A: update in place.
    let engine_a = engine();
    engine_a.build_indexes(&corpus).unwrap();
    engine_a.update_document("d2", &replacement).unwrap();

    // Engine B: delete then add.
    let engine_b = engine();
    engine_b.build_indexes(&corpus).unwrap();
    engine_b.delete_document("d2").unwrap();
    engine_b.add_document(&replacement).unwrap();

    for query in ["python aws", "machine learning", "kubernetes"] {
        let a: Vec<String> = engine_a
            .search(query, 3, None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc_id)
            .collect();
        let b: Vec<String> = engine_b
            .search(query, 3, None, None)
            .unwrap()
            .into_iter()
            .map(|r| r.doc_id)
            .collect();
        assert_eq!(a, b, "update and delete+add diverged for {query:?}");
    }
    assert_eq!(
        engine_a.health().corpus_size,
        engine_b.health().corpus_size
    );
}

#[test]
fn tombstoned_documents_never_surface() {
    let engine = engine();
    engine.build_indexes(&synthetic_corpus(100)).unwrap();
    for i in 0..50 {
        engine.delete_document(&format!("doc-{i:04}")).unwrap();
    }
    assert_eq!(engine.health().corpus_size, 50);
    assert_eq!(engine.health().tombstones, 50);

    let results = engine.search("python aws engineer", 100, None, None).unwrap();
    assert!(!results.is_empty());
    for r in &results {
        let n: usize = r.doc_id["doc-".len()..].parse().unwrap();
        assert!(n >= 50, "tombstoned {} surfaced", r.doc_id);
    }
}

#[test]
fn combined_scores_are_nonnegative_and_consistent() {
    let engine = engine();
    engine.build_indexes(&synthetic_corpus(200)).unwrap();
    let results = engine.search("rust kubernetes data", 50, None, None).unwrap();
    assert!(!results.is_empty());
    for r in &results {
        assert!(r.combined_score >= 0.0);
        let expected = 0.6 * r.cos + 0.3 * r.bm25 + 0.1 * r.jac;
        assert!((r.combined_score - expected).abs() < 1e-5);
    }
    // Descending order with deterministic tie-breaks.
    for pair in results.windows(2) {
        assert!(
            pair[0].combined_score > pair[1].combined_score
                || (pair[0].combined_score == pair[1].combined_score
                    && pair[0].doc_id < pair[1].doc_id)
        );
    }
}

#[test]
fn build_persists_and_failed_load_requires_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let engine_a = engine_with(Some(dir.path().to_path_buf()));
    engine_a.build_indexes(&resume_corpus()).unwrap();

    // The build wrote a generation directory on its own.
    let engine_b = engine();
    engine_b.load(dir.path()).unwrap();
    assert_eq!(engine_b.health().corpus_size, 3);

    // Corrupt every file; a fresh engine must refuse to load.
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let gen_dir = entry.unwrap().path();
        if !gen_dir.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(&gen_dir).unwrap() {
            let path = file.unwrap().path();
            let mut bytes = std::fs::read(&path).unwrap();
            let mid = bytes.len() / 2;
            bytes[mid] ^= 0xFF;
            std::fs::write(&path, bytes).unwrap();
        }
    }
    let engine_c = engine();
    assert!(matches!(
        engine_c.load(dir.path()),
        Err(EngineError::Corrupt(_))
    ));
    assert!(matches!(
        engine_c.search("python", 1, None, None),
        Err(EngineError::IndexNotReady)
    ));
}

#[test]
fn generation_advances_monotonically() {
    let engine = engine();
    engine.build_indexes(&resume_corpus()).unwrap();
    let g1 = engine.health().generation;
    let g2 = engine
        .add_document(&Document::new("d4", "site reliability engineer"))
        .unwrap()
        .generation;
    let g3 = engine.delete_document("d4").unwrap().generation;
    let g4 = engine.rebuild().unwrap().generation;
    assert!(g1 < g2 && g2 < g3 && g3 < g4);
}
