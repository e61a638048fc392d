//! BM25 lexical scoring.
//!
//! Unlike a search-first inverted index, this engine scores BM25 lazily per
//! candidate: candidates come from the LSH and HNSW stages, and BM25 only has
//! to answer `score(query_tokens, doc_id)`. The index therefore keeps
//! per-document term frequency maps plus the global document-frequency table
//! needed for IDF.

mod index;

pub use index::Bm25Index;
