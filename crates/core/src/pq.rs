//! Product quantization: memory-efficient vector codes and asymmetric
//! approximate distance.
//!
//! The D-dimensional space is split into M equal-width subspaces; k-means
//! learns K centroids per subspace and each vector becomes M centroid
//! indices (one byte each for K ≤ 256). Querying builds a per-subspace
//! `K`-entry table of squared distances so approximate distance is M lookups
//! and adds. The quantizer is a reranking and memory aid — final ranking in
//! the engine always uses exact cosine on the candidate set.

use crate::config::{PqParams, PQ_KMEANS_ITERATIONS};
use crate::error::{EngineError, Result};
use crate::math::euclidean_sq;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trained codebook: M subspaces × K centroids × `sub_dim` floats, flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    pub num_subspaces: usize,
    pub num_centroids: usize,
    pub sub_dim: usize,
    /// `centroids[m * K * sub_dim + k * sub_dim ..][..sub_dim]`
    pub centroids: Vec<f32>,
}

/// Precomputed per-query lookup table: `[M][K]` partial squared distances.
pub struct PqDistanceTable {
    table: Vec<f32>,
    num_subspaces: usize,
    num_centroids: usize,
}

/// Product quantizer with per-document code storage.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductQuantizer {
    params: PqParams,
    codebook: Option<PqCodebook>,
    codes: HashMap<u32, Vec<u8>>,
}

impl ProductQuantizer {
    pub fn new(params: PqParams) -> Self {
        Self {
            params,
            codebook: None,
            codes: HashMap::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    pub fn params(&self) -> &PqParams {
        &self.params
    }

    /// Number of stored codes.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, doc_id: u32) -> bool {
        self.codes.contains_key(&doc_id)
    }

    /// Train the codebook on a flat sample of `dim`-wide vectors.
    ///
    /// Fails if the dimension is not divisible by the subspace count or the
    /// sample is empty. Retraining replaces the codebook and invalidates all
    /// stored codes — callers re-encode afterwards.
    pub fn train(&mut self, sample: &[f32], dim: usize) -> Result<()> {
        let m = self.params.m;
        if dim % m != 0 {
            return Err(EngineError::Validation(format!(
                "embedding dimension {dim} is not divisible by pq.m {m}"
            )));
        }
        let n = sample.len() / dim;
        if n == 0 {
            return Err(EngineError::Validation(
                "cannot train product quantizer on an empty sample".into(),
            ));
        }
        let k = self.params.k;
        let sub_dim = dim / m;
        let mut centroids = vec![0.0f32; m * k * sub_dim];

        for sub in 0..m {
            // Gather this subspace's slice of every sample vector.
            let mut sub_vectors = vec![0.0f32; n * sub_dim];
            for i in 0..n {
                let src = i * dim + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&sample[src..src + sub_dim]);
            }
            let effective_k = k.min(n);
            let sub_centroids = kmeans(&sub_vectors, sub_dim, effective_k, sub as u64);
            let out = sub * k * sub_dim;
            centroids[out..out + effective_k * sub_dim]
                .copy_from_slice(&sub_centroids[..effective_k * sub_dim]);
        }

        self.codebook = Some(PqCodebook {
            num_subspaces: m,
            num_centroids: k,
            sub_dim,
            centroids,
        });
        self.codes.clear();
        Ok(())
    }

    /// Encode a vector into M centroid indices. Requires training.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let codebook = self
            .codebook
            .as_ref()
            .ok_or_else(|| EngineError::Validation("product quantizer is not trained".into()))?;
        if vector.len() != codebook.num_subspaces * codebook.sub_dim {
            return Err(EngineError::Validation(format!(
                "vector length {} does not match trained dimension {}",
                vector.len(),
                codebook.num_subspaces * codebook.sub_dim
            )));
        }
        Ok(codebook.encode(vector))
    }

    /// Encode and remember the code for a document.
    pub fn encode_and_store(&mut self, doc_id: u32, vector: &[f32]) -> Result<()> {
        let code = self.encode(vector)?;
        self.codes.insert(doc_id, code);
        Ok(())
    }

    /// Drop a document's code. Unknown ids are a no-op.
    pub fn remove(&mut self, doc_id: u32) {
        self.codes.remove(&doc_id);
    }

    /// Stored code for a document.
    pub fn code(&self, doc_id: u32) -> Option<&[u8]> {
        self.codes.get(&doc_id).map(Vec::as_slice)
    }

    /// Build the per-query asymmetric distance table. Requires training.
    pub fn distance_table(&self, query: &[f32]) -> Result<PqDistanceTable> {
        let codebook = self
            .codebook
            .as_ref()
            .ok_or_else(|| EngineError::Validation("product quantizer is not trained".into()))?;
        Ok(codebook.distance_table(query))
    }

    /// Approximate squared distance from the tabled query to a stored doc.
    /// Unknown documents return `None`.
    pub fn approx_distance(&self, table: &PqDistanceTable, doc_id: u32) -> Option<f32> {
        self.codes.get(&doc_id).map(|code| table.distance(code))
    }
}

impl PqCodebook {
    fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.num_subspaces);
        for sub in 0..self.num_subspaces {
            let sub_vec = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            codes.push(self.nearest_centroid(sub, sub_vec));
        }
        codes
    }

    fn distance_table(&self, query: &[f32]) -> PqDistanceTable {
        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_subspaces * k];
        for sub in 0..self.num_subspaces {
            let q_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                let c_start = sub * k * self.sub_dim + ci * self.sub_dim;
                let centroid = &self.centroids[c_start..c_start + self.sub_dim];
                table[sub * k + ci] = euclidean_sq(q_sub, centroid);
            }
        }
        PqDistanceTable {
            table,
            num_subspaces: self.num_subspaces,
            num_centroids: k,
        }
    }

    #[inline]
    fn nearest_centroid(&self, subspace: usize, sub_vec: &[f32]) -> u8 {
        let k = self.num_centroids;
        let base = subspace * k * self.sub_dim;
        let mut best = 0u8;
        let mut best_dist = f32::MAX;
        for ci in 0..k {
            let c_start = base + ci * self.sub_dim;
            let centroid = &self.centroids[c_start..c_start + self.sub_dim];
            let dist = euclidean_sq(sub_vec, centroid);
            if dist < best_dist {
                best_dist = dist;
                best = ci as u8;
            }
        }
        best
    }
}

impl PqDistanceTable {
    /// Sum the selected centroid entries: M lookups, M adds. Non-negative.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        let mut dist = 0.0f32;
        for m in 0..self.num_subspaces {
            dist += self.table[m * self.num_centroids + codes[m] as usize];
        }
        dist
    }
}

/// K-means with k-means++ seeding and a fixed iteration budget.
///
/// Deterministic: the RNG is seeded from the subspace index so repeated
/// builds over the same sample produce identical codebooks.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, seed: u64) -> Vec<f32> {
    let n = data.len() / sub_dim;
    if n <= k {
        let mut centroids = vec![0.0f32; k * sub_dim];
        centroids[..n * sub_dim].copy_from_slice(&data[..n * sub_dim]);
        return centroids;
    }

    let mut rng = XorShift64::new(seed);
    let mut centroids = vec![0.0f32; k * sub_dim];

    // k-means++ seeding: first centroid uniform, the rest weighted by
    // squared distance to the nearest chosen centroid.
    let first = rng.next_usize() % n;
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);
    let mut min_dists = vec![f32::MAX; n];

    for ci in 1..k {
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let d = euclidean_sq(point, last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }
        if total < 1e-30 {
            let idx = rng.next_usize() % n;
            centroids[ci * sub_dim..(ci + 1) * sub_dim]
                .copy_from_slice(&data[idx * sub_dim..(idx + 1) * sub_dim]);
            continue;
        }
        let threshold = rng.next_f64() * total;
        let mut cumulative = 0.0f64;
        let mut chosen = n - 1;
        for (i, &d) in min_dists.iter().enumerate() {
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = i;
                break;
            }
        }
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    // Lloyd iterations.
    let mut assignments = vec![0usize; n];
    for _ in 0..PQ_KMEANS_ITERATIONS {
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let centroid = &centroids[ci * sub_dim..(ci + 1) * sub_dim];
                let d = euclidean_sq(point, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = ci;
                }
            }
            assignments[i] = best;
        }

        let mut counts = vec![0u32; k];
        centroids.fill(0.0);
        for i in 0..n {
            let ci = assignments[i];
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let c = &mut centroids[ci * sub_dim..(ci + 1) * sub_dim];
            for d in 0..sub_dim {
                c[d] += point[d];
            }
        }
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for val in &mut centroids[ci * sub_dim..(ci + 1) * sub_dim] {
                    *val *= inv;
                }
            }
        }
    }

    centroids
}

/// Minimal deterministic xorshift64 PRNG for reproducible training.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(0x9e3779b97f4a7c15) | 1,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_usize(&mut self) -> usize {
        self.next_u64() as usize
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
