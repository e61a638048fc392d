//! Snapshot codec: one directory per generation, one framed file per index.
//!
//! Every file is `[magic 4B][version u32 BE][section…][CRC32 u32 BE]` where a
//! section is `[u32 length BE][bincode payload]` and the checksum covers all
//! framed section bytes. Writes go to a temp directory renamed into place, so
//! a crash mid-snapshot leaves either the old generation or nothing — a
//! partial directory never parses and is treated as absent, which forces a
//! rebuild.

use crate::bm25::Bm25Index;
use crate::error::{EngineError, Result};
use crate::hnsw::HnswGraph;
use crate::lsh::LshIndex;
use crate::pq::ProductQuantizer;
use crate::store::DocumentStore;
use crate::vectors::EmbeddingStore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 1;

const MAGIC_MANIFEST: &[u8; 4] = b"TRMF";
const MAGIC_HNSW: &[u8; 4] = b"TRHN";
const MAGIC_LSH: &[u8; 4] = b"TRLS";
const MAGIC_BM25: &[u8; 4] = b"TRBM";
const MAGIC_PQ: &[u8; 4] = b"TRPQ";
const MAGIC_EMBEDDINGS: &[u8; 4] = b"TREM";
const MAGIC_METADATA: &[u8; 4] = b"TRMD";

/// Snapshot self-description, verified against the engine config on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub dimension: usize,
    pub document_count: usize,
    pub pq_m: usize,
    pub pq_k: usize,
    pub lsh_num_bands: usize,
    pub lsh_rows_per_band: usize,
}

/// Borrowed view of everything one generation persists.
pub struct SnapshotWriter<'a> {
    pub manifest: Manifest,
    pub hnsw: &'a HnswGraph,
    pub lsh: &'a LshIndex,
    pub bm25: &'a Bm25Index,
    pub pq: &'a ProductQuantizer,
    pub embeddings: &'a EmbeddingStore,
    pub store: &'a DocumentStore,
}

/// Owned result of loading one generation.
pub struct Snapshot {
    pub manifest: Manifest,
    pub hnsw: HnswGraph,
    pub lsh: LshIndex,
    pub bm25: Bm25Index,
    pub pq: ProductQuantizer,
    pub embeddings: EmbeddingStore,
    pub store: DocumentStore,
}

/// Write a generation directory under `base`, atomically.
pub fn save(base: &Path, snap: SnapshotWriter<'_>) -> Result<PathBuf> {
    fs::create_dir_all(base)?;
    let generation = snap.manifest.generation;
    let final_dir = base.join(format!("gen-{generation:08}"));
    let tmp_dir = base.join(format!(".tmp-gen-{generation:08}"));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    write_framed(&tmp_dir.join("manifest.bin"), MAGIC_MANIFEST, &[encode(&snap.manifest)?])?;
    write_framed(&tmp_dir.join("hnsw.bin"), MAGIC_HNSW, &[encode(snap.hnsw)?])?;
    write_framed(&tmp_dir.join("lsh.bin"), MAGIC_LSH, &[encode(snap.lsh)?])?;
    write_framed(&tmp_dir.join("bm25.bin"), MAGIC_BM25, &[encode(snap.bm25)?])?;
    // pq.bin leads with an explicit one-byte trained flag section.
    write_framed(
        &tmp_dir.join("pq.bin"),
        MAGIC_PQ,
        &[vec![snap.pq.is_trained() as u8], encode(snap.pq)?],
    )?;
    write_framed(
        &tmp_dir.join("embeddings.bin"),
        MAGIC_EMBEDDINGS,
        &[encode(snap.embeddings)?],
    )?;
    write_framed(&tmp_dir.join("metadata.bin"), MAGIC_METADATA, &[encode(snap.store)?])?;

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;
    tracing::info!(
        generation,
        path = %final_dir.display(),
        documents = snap.manifest.document_count,
        "snapshot saved"
    );
    Ok(final_dir)
}

/// Load the newest verifiable generation under `base`.
///
/// Generations that fail any integrity check are skipped with a warning;
/// `Ok(None)` means nothing loadable exists and the caller should rebuild.
pub fn load_latest(base: &Path) -> Result<Option<Snapshot>> {
    if !base.exists() {
        return Ok(None);
    }
    let mut generations: Vec<PathBuf> = fs::read_dir(base)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("gen-"))
        })
        .collect();
    generations.sort();

    for dir in generations.into_iter().rev() {
        match load_dir(&dir) {
            Ok(snapshot) => {
                tracing::info!(
                    generation = snapshot.manifest.generation,
                    path = %dir.display(),
                    documents = snapshot.manifest.document_count,
                    "snapshot loaded"
                );
                return Ok(Some(snapshot));
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "skipping unusable snapshot");
            }
        }
    }
    Ok(None)
}

/// Load one generation directory, verifying every file.
pub fn load_dir(dir: &Path) -> Result<Snapshot> {
    let manifest: Manifest = decode_one(&read_framed(&dir.join("manifest.bin"), MAGIC_MANIFEST)?)?;
    let hnsw: HnswGraph = decode_one(&read_framed(&dir.join("hnsw.bin"), MAGIC_HNSW)?)?;
    let lsh: LshIndex = decode_one(&read_framed(&dir.join("lsh.bin"), MAGIC_LSH)?)?;
    let bm25: Bm25Index = decode_one(&read_framed(&dir.join("bm25.bin"), MAGIC_BM25)?)?;

    let pq_sections = read_framed(&dir.join("pq.bin"), MAGIC_PQ)?;
    if pq_sections.len() != 2 || pq_sections[0].len() != 1 {
        return Err(EngineError::Corrupt("pq.bin has unexpected layout".into()));
    }
    let pq: ProductQuantizer = decode(&pq_sections[1])?;
    if (pq_sections[0][0] != 0) != pq.is_trained() {
        return Err(EngineError::Corrupt(
            "pq.bin trained flag disagrees with codebook".into(),
        ));
    }

    let embeddings: EmbeddingStore =
        decode_one(&read_framed(&dir.join("embeddings.bin"), MAGIC_EMBEDDINGS)?)?;
    let store: DocumentStore = decode_one(&read_framed(&dir.join("metadata.bin"), MAGIC_METADATA)?)?;

    // Cross-file sanity: the arena and graph must agree before the engine
    // trusts a loaded generation.
    if embeddings.dimension() != manifest.dimension {
        return Err(EngineError::Corrupt(format!(
            "embeddings dimension {} != manifest dimension {}",
            embeddings.dimension(),
            manifest.dimension
        )));
    }
    if hnsw.node_count() != embeddings.len() {
        return Err(EngineError::Corrupt(format!(
            "hnsw node count {} != embedding rows {}",
            hnsw.node_count(),
            embeddings.len()
        )));
    }
    if store.len() != manifest.document_count {
        return Err(EngineError::Corrupt(format!(
            "metadata live count {} != manifest document count {}",
            store.len(),
            manifest.document_count
        )));
    }

    Ok(Snapshot {
        manifest,
        hnsw,
        lsh,
        bm25,
        pq,
        embeddings,
        store,
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EngineError::Corrupt(format!("serialize: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| EngineError::Corrupt(format!("deserialize: {e}")))
}

fn decode_one<T: DeserializeOwned>(sections: &[Vec<u8>]) -> Result<T> {
    let first = sections
        .first()
        .ok_or_else(|| EngineError::Corrupt("file has no sections".into()))?;
    decode(first)
}

/// `[magic][version BE][u32 len BE + payload]…[CRC32 BE over framed sections]`
fn write_framed(path: &Path, magic: &[u8; 4], sections: &[Vec<u8>]) -> Result<()> {
    let mut framed = Vec::new();
    for section in sections {
        framed.extend_from_slice(&(section.len() as u32).to_be_bytes());
        framed.extend_from_slice(section);
    }
    let crc = crc32fast::hash(&framed);

    let mut out = Vec::with_capacity(8 + framed.len() + 4);
    out.extend_from_slice(magic);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(&framed);
    out.extend_from_slice(&crc.to_be_bytes());
    fs::write(path, out)?;
    Ok(())
}

fn read_framed(path: &Path, magic: &[u8; 4]) -> Result<Vec<Vec<u8>>> {
    let raw = fs::read(path)?;
    if raw.len() < 12 {
        return Err(EngineError::Corrupt(format!(
            "{}: too short to hold header and checksum",
            path.display()
        )));
    }
    if &raw[..4] != magic {
        return Err(EngineError::Corrupt(format!(
            "{}: bad magic {:02x?}",
            path.display(),
            &raw[..4]
        )));
    }
    let version = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if version != FORMAT_VERSION {
        return Err(EngineError::Corrupt(format!(
            "{}: unsupported format version {version}",
            path.display()
        )));
    }

    let framed = &raw[8..raw.len() - 4];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(framed);
    if stored_crc != computed_crc {
        return Err(EngineError::Corrupt(format!(
            "{}: checksum mismatch (stored {stored_crc:#010x}, computed {computed_crc:#010x})",
            path.display()
        )));
    }

    let mut sections = Vec::new();
    let mut offset = 0usize;
    while offset < framed.len() {
        if offset + 4 > framed.len() {
            return Err(EngineError::Corrupt(format!(
                "{}: truncated section header",
                path.display()
            )));
        }
        let len = u32::from_be_bytes([
            framed[offset],
            framed[offset + 1],
            framed[offset + 2],
            framed[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > framed.len() {
            return Err(EngineError::Corrupt(format!(
                "{}: section overruns file",
                path.display()
            )));
        }
        sections.push(framed[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(sections)
}
