//! Per-document term statistics and Okapi BM25 scoring.

use crate::config::Bm25Params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Term statistics for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocTerms {
    /// term → frequency within the document.
    tf: HashMap<String, u32>,
    /// Token count of the document (before deduplication).
    length: u32,
}

/// BM25 index: per-doc term frequencies, document frequencies, and the
/// corpus aggregates needed for length normalization.
#[derive(Debug, Serialize, Deserialize)]
pub struct Bm25Index {
    params: Bm25Params,
    docs: HashMap<u32, DocTerms>,
    /// term → number of documents containing it.
    doc_frequencies: HashMap<String, u32>,
    /// Sum of all document lengths, for the running average.
    total_length: u64,
}

impl Bm25Index {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            docs: HashMap::new(),
            doc_frequencies: HashMap::new(),
            total_length: 0,
        }
    }

    /// Number of indexed documents.
    pub fn corpus_size(&self) -> usize {
        self.docs.len()
    }

    /// Average document length across the corpus; 0 when empty.
    pub fn average_doc_length(&self) -> f32 {
        if self.docs.is_empty() {
            return 0.0;
        }
        self.total_length as f32 / self.docs.len() as f32
    }

    /// Indexed length of a document, if present.
    pub fn doc_length(&self, doc_id: u32) -> Option<u32> {
        self.docs.get(&doc_id).map(|d| d.length)
    }

    pub fn contains(&self, doc_id: u32) -> bool {
        self.docs.contains_key(&doc_id)
    }

    /// Index a document's token stream (duplicates carry term frequency).
    /// Re-adding an existing id replaces its previous stats.
    pub fn add<'a>(&mut self, doc_id: u32, tokens: impl Iterator<Item = &'a str>) {
        if self.docs.contains_key(&doc_id) {
            self.remove(doc_id);
        }
        let mut tf: HashMap<String, u32> = HashMap::new();
        let mut length = 0u32;
        for token in tokens {
            *tf.entry(token.to_string()).or_insert(0) += 1;
            length += 1;
        }
        for term in tf.keys() {
            *self.doc_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += length as u64;
        self.docs.insert(doc_id, DocTerms { tf, length });
    }

    /// Drop a document and roll its terms out of the aggregates.
    pub fn remove(&mut self, doc_id: u32) {
        let Some(doc) = self.docs.remove(&doc_id) else {
            return;
        };
        self.total_length -= doc.length as u64;
        for term in doc.tf.keys() {
            if let Some(df) = self.doc_frequencies.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_frequencies.remove(term);
                }
            }
        }
    }

    /// Okapi BM25 score of a document against query tokens.
    ///
    /// `IDF = ln((N - df + 0.5) / (df + 0.5) + 1)`; terms absent from the
    /// corpus contribute 0, never a negative term. Zero-length and unknown
    /// documents score 0.
    pub fn score<'a>(&self, query_tokens: impl Iterator<Item = &'a str>, doc_id: u32) -> f32 {
        let Some(doc) = self.docs.get(&doc_id) else {
            return 0.0;
        };
        if doc.length == 0 {
            return 0.0;
        }
        let n = self.docs.len() as f32;
        let avgdl = self.average_doc_length();
        let Bm25Params { k1, b } = self.params;

        let mut score = 0.0f32;
        for term in query_tokens {
            let Some(&tf) = doc.tf.get(term) else {
                continue;
            };
            let df = self.doc_frequencies.get(term).copied().unwrap_or(0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f32;
            let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * doc.length as f32 / avgdl));
            score += idf * tf_norm;
        }
        score
    }

    /// Rekey all entries through the old→new id mapping, dropping entries
    /// with no mapping. Used by rebuilds that compact internal ids.
    pub fn remap(&self, mapping: &HashMap<u32, u32>) -> Self {
        let mut out = Self::new(self.params);
        for (old_id, doc) in &self.docs {
            if let Some(&new_id) = mapping.get(old_id) {
                out.total_length += doc.length as u64;
                for term in doc.tf.keys() {
                    *out.doc_frequencies.entry(term.clone()).or_insert(0) += 1;
                }
                out.docs.insert(new_id, doc.clone());
            }
        }
        out
    }
}
