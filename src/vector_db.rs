//! Persistent vector index for one document.
//!
//! The index lives in `<dir>/index.json` next to a manifest describing what
//! produced it. Opening follows a single policy: reuse the file when its
//! manifest matches the current document, embedder and chunking, otherwise
//! rebuild and overwrite it. Records are never appended to an existing index.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::{Chunk, ChunkConfig};
use crate::embedding::Embedder;
use crate::error::{QaError, Result};
use crate::utils::ensure_dir;

const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// What an index was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub fingerprint: String,
    pub embedding_model: String,
    pub chunk_config: ChunkConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredIndex {
    format: u32,
    manifest: IndexManifest,
    dim: usize,
    records: Vec<VectorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Reused,
    Built,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct VectorStore {
    path: PathBuf,
    manifest: IndexManifest,
    dim: usize,
    records: Vec<VectorRecord>,
}

impl VectorStore {
    pub async fn open_or_build(
        dir: &Path,
        manifest: IndexManifest,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        force_rebuild: bool,
    ) -> Result<(Self, IndexOutcome)> {
        if !force_rebuild {
            match Self::load(dir) {
                Ok(Some(store)) if store.manifest == manifest => {
                    info!(
                        path = %store.path.display(),
                        records = store.records.len(),
                        "reusing persisted index"
                    );
                    return Ok((store, IndexOutcome::Reused));
                }
                Ok(Some(_)) => info!("persisted index is stale, rebuilding"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "persisted index unreadable, rebuilding"),
            }
        }
        let store = Self::build(dir, manifest, chunks, embedder).await?;
        Ok((store, IndexOutcome::Built))
    }

    /// Loads `<dir>/index.json`, or `None` when no index has been written yet.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let stored: StoredIndex = serde_json::from_slice(&bytes)?;
        if stored.format != FORMAT_VERSION {
            return Err(QaError::Store(format!(
                "unsupported index format {} (expected {FORMAT_VERSION})",
                stored.format
            )));
        }
        if let Some(bad) = stored.records.iter().find(|r| r.embedding.len() != stored.dim) {
            return Err(QaError::DimensionMismatch {
                expected: stored.dim,
                actual: bad.embedding.len(),
            });
        }
        Ok(Some(Self {
            path,
            manifest: stored.manifest,
            dim: stored.dim,
            records: stored.records,
        }))
    }

    pub async fn build(
        dir: &Path,
        manifest: IndexManifest,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
    ) -> Result<Self> {
        info!(chunks = chunks.len(), model = %manifest.embedding_model, "embedding chunks");
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(QaError::Store(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dim = embeddings.first().map(Vec::len).unwrap_or(0);
        let mut records = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            if embedding.len() != dim {
                return Err(QaError::DimensionMismatch {
                    expected: dim,
                    actual: embedding.len(),
                });
            }
            records.push(VectorRecord { chunk, embedding });
        }

        let store = Self {
            path: dir.join(INDEX_FILE),
            manifest,
            dim,
            records,
        };
        store.persist()?;
        Ok(store)
    }

    /// Writes the whole index, replacing any previous file.
    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }
        let stored = StoredIndex {
            format: FORMAT_VERSION,
            manifest: self.manifest.clone(),
            dim: self.dim,
            records: self.records.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&stored)?)?;
        fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            records = self.records.len(),
            dim = self.dim,
            "index persisted"
        );
        Ok(())
    }

    /// Top `k` chunks by cosine similarity, best first. Equal scores keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(QaError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let query = ArrayView1::from(query);
        let mut similarities: Vec<(f32, &VectorRecord)> = self
            .records
            .iter()
            .map(|rec| {
                let similarity = cosine_similarity(&ArrayView1::from(&rec.embedding[..]), &query);
                (similarity, rec)
            })
            .collect();

        similarities.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(similarities
            .into_iter()
            .take(k)
            .map(|(score, rec)| ScoredChunk {
                chunk: rec.chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[cfg(test)]
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }
}

fn cosine_similarity(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
    let dot_product = a.dot(b);
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
