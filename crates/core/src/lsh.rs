//! MinHash LSH index over document token sets.
//!
//! Signatures are the elementwise minimum of `H = num_bands * rows_per_band`
//! seeded hashes over the token set. Signatures are split into `num_bands`
//! groups of `rows_per_band` values; two documents land in the same bucket of
//! a band iff every row in that band matches, which amplifies the collision
//! probability to roughly `s^rows` for Jaccard similarity `s`.
//!
//! Candidates are a superset: callers verify with [`LshIndex::jaccard`],
//! which is exact over the stored token sets.

use crate::config::LshParams;
use crate::embed::{fnv1a64, splitmix64};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Fixed seed for the hash family. Signatures are persisted, so the family
/// must be identical across processes and restarts.
const HASH_FAMILY_SEED: u64 = 0x7472_6964_656e_7431;

/// MinHash LSH index with exact-Jaccard verification storage.
#[derive(Debug, Serialize, Deserialize)]
pub struct LshIndex {
    num_bands: usize,
    rows_per_band: usize,
    /// Per-hash-function seeds, length `num_bands * rows_per_band`.
    seeds: Vec<u64>,
    /// Per-band buckets: band key → doc ids sharing that band signature.
    bands: Vec<HashMap<u64, HashSet<u32>>>,
    /// Stored MinHash signatures by internal doc id.
    signatures: HashMap<u32, Vec<u64>>,
    /// Stored token sets for exact Jaccard scoring.
    token_sets: HashMap<u32, HashSet<String>>,
}

impl LshIndex {
    pub fn new(params: &LshParams) -> Self {
        let num_hashes = params.num_bands * params.rows_per_band;
        let mut seeds = Vec::with_capacity(num_hashes);
        let mut state = HASH_FAMILY_SEED;
        for _ in 0..num_hashes {
            state = splitmix64(state);
            seeds.push(state);
        }
        Self {
            num_bands: params.num_bands,
            rows_per_band: params.rows_per_band,
            seeds,
            bands: (0..params.num_bands).map(|_| HashMap::new()).collect(),
            signatures: HashMap::new(),
            token_sets: HashMap::new(),
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.token_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_sets.is_empty()
    }

    /// Returns `true` if the document has a stored signature.
    pub fn contains(&self, doc_id: u32) -> bool {
        self.signatures.contains_key(&doc_id)
    }

    /// Insert or replace a document's token set.
    pub fn add(&mut self, doc_id: u32, tokens: HashSet<String>) {
        if self.signatures.contains_key(&doc_id) {
            self.remove(doc_id);
        }
        let signature = self.signature(&tokens);
        if !tokens.is_empty() {
            for (band_idx, chunk) in signature.chunks(self.rows_per_band).enumerate() {
                let key = band_key(chunk);
                self.bands[band_idx].entry(key).or_default().insert(doc_id);
            }
        }
        self.signatures.insert(doc_id, signature);
        self.token_sets.insert(doc_id, tokens);
    }

    /// Erase a document from every band. Unknown ids are a no-op.
    pub fn remove(&mut self, doc_id: u32) {
        let Some(signature) = self.signatures.remove(&doc_id) else {
            return;
        };
        let tokens = self.token_sets.remove(&doc_id);
        if tokens.map_or(true, |t| t.is_empty()) {
            return;
        }
        for (band_idx, chunk) in signature.chunks(self.rows_per_band).enumerate() {
            let key = band_key(chunk);
            if let Some(bucket) = self.bands[band_idx].get_mut(&key) {
                bucket.remove(&doc_id);
                if bucket.is_empty() {
                    self.bands[band_idx].remove(&key);
                }
            }
        }
    }

    /// All documents sharing at least one band signature with the query
    /// token set, deduplicated. Empty queries produce no candidates.
    pub fn candidates(&self, query_tokens: &HashSet<String>) -> HashSet<u32> {
        let mut out = HashSet::new();
        if query_tokens.is_empty() {
            return out;
        }
        let signature = self.signature(query_tokens);
        for (band_idx, chunk) in signature.chunks(self.rows_per_band).enumerate() {
            let key = band_key(chunk);
            if let Some(bucket) = self.bands[band_idx].get(&key) {
                out.extend(bucket.iter().copied());
            }
        }
        out
    }

    /// Exact Jaccard similarity between the query token set and a stored
    /// document's token set. Unknown documents and empty sets score 0.
    pub fn jaccard(&self, query_tokens: &HashSet<String>, doc_id: u32) -> f32 {
        let Some(doc_tokens) = self.token_sets.get(&doc_id) else {
            return 0.0;
        };
        if query_tokens.is_empty() || doc_tokens.is_empty() {
            return 0.0;
        }
        let intersection = query_tokens.intersection(doc_tokens).count();
        let union = query_tokens.len() + doc_tokens.len() - intersection;
        intersection as f32 / union as f32
    }

    /// Stored token set for a document, if indexed.
    pub fn tokens(&self, doc_id: u32) -> Option<&HashSet<String>> {
        self.token_sets.get(&doc_id)
    }

    /// MinHash signature: elementwise minimum of each seeded hash over the
    /// token set. An empty set yields the all-MAX signature.
    fn signature(&self, tokens: &HashSet<String>) -> Vec<u64> {
        let mut mins = vec![u64::MAX; self.seeds.len()];
        for token in tokens {
            let base = fnv1a64(token.as_bytes());
            for (i, &seed) in self.seeds.iter().enumerate() {
                let h = splitmix64(seed ^ base);
                if h < mins[i] {
                    mins[i] = h;
                }
            }
        }
        mins
    }
}

/// Collapse one band's rows into a bucket key.
#[inline]
fn band_key(rows: &[u64]) -> u64 {
    let mut acc = 0xcbf29ce484222325u64;
    for &v in rows {
        acc = splitmix64(acc ^ v);
    }
    acc
}
