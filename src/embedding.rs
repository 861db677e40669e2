use std::hash::Hasher;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::error::{QaError, Result};
use crate::openai::OpenAiClient;

/// Turns text into vectors. All vectors from one embedder share a dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the model; an index built with one id is not reused with another.
    fn model_id(&self) -> String;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let req = EmbeddingsRequest {
                model: &self.model,
                input: batch,
            };
            let resp: EmbeddingsResponse = self
                .client
                .post_json("embeddings", "/v1/embeddings", &req)
                .await?;
            out.extend(order_by_index(resp.data, batch.len())?);
            debug!(embedded = out.len(), total = texts.len(), "embedding batch done");
        }
        Ok(out)
    }
}

/// The API may return items out of order; `index` is authoritative.
fn order_by_index(items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(QaError::remote(
            "embeddings",
            None,
            format!("expected {expected} embeddings, got {}", items.len()),
        ));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in items {
        let slot = slots.get_mut(item.index).ok_or_else(|| {
            QaError::remote(
                "embeddings",
                None,
                format!("embedding index {} out of range", item.index),
            )
        })?;
        *slot = Some(item.embedding);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| QaError::remote("embeddings", None, format!("missing embedding {i}")))
        })
        .collect()
}

/// Offline embedder: hashed term frequencies, L2-normalized.
///
/// Deterministic across runs, so a persisted index built with it stays valid.
pub struct LexicalEmbedder {
    dim: usize,
}

impl LexicalEmbedder {
    pub const DEFAULT_DIM: usize = 1024;

    pub fn new(dim: usize) -> Self {
        info!(dim, "using local lexical embeddings");
        Self { dim: dim.max(1) }
    }

    fn tokenize(text: &str) -> Vec<String> {
        lazy_static! {
            static ref STOP_WORDS: FxHashSet<&'static str> = {
                let words = vec![
                    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
                    "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
                    "to", "was", "were", "will", "with"
                ];
                words.into_iter().collect()
            };
            static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
        }

        let text = text.nfc().collect::<String>().to_lowercase();
        let text = NON_WORD.replace_all(&text, " ");

        text.split_whitespace()
            .filter(|&token| !STOP_WORDS.contains(token))
            .map(|token| token.to_string())
            .collect()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut term_freq: FxHashMap<String, f32> = FxHashMap::default();
        for token in Self::tokenize(text) {
            *term_freq.entry(token).or_insert(0.0) += 1.0;
        }

        let mut vector = vec![0.0f32; self.dim];
        for (term, freq) in term_freq {
            let mut hasher = FxHasher::default();
            hasher.write(term.as_bytes());
            let bucket = (hasher.finish() % self.dim as u64) as usize;
            vector[bucket] += freq;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

#[async_trait]
impl Embedder for LexicalEmbedder {
    fn model_id(&self) -> String {
        format!("lexical:{}", self.dim)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}
