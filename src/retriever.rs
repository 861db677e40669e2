use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{QaError, Result};
use crate::vector_db::{ScoredChunk, VectorStore};

/// A vector store paired with the embedder that built it.
pub struct Retriever {
    vector_db: VectorStore,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(vector_db: VectorStore, embedder: Arc<dyn Embedder>) -> Self {
        Retriever { vector_db, embedder }
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| QaError::remote("embeddings", None, "no embedding returned for query"))?;

        let hits = self.vector_db.search(&query_vec, top_k)?;
        debug!(
            top_k,
            hits = hits.len(),
            best = hits.first().map(|h| h.score).unwrap_or(0.0),
            "retrieved chunks"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkConfig, split_pages};
    use crate::document::Page;
    use crate::embedding::LexicalEmbedder;
    use crate::vector_db::IndexManifest;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_retrieve_best_page() -> Result<()> {
        let dir = tempdir()?;
        let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::new(256));
        let cfg = ChunkConfig::new(1000, 200)?;
        let pages = vec![
            Page {
                number: 1,
                text: "Invoices are due within thirty days.".into(),
            },
            Page {
                number: 2,
                text: "Refunds require the original receipt.".into(),
            },
        ];
        let manifest = IndexManifest {
            fingerprint: "x".into(),
            embedding_model: embedder.model_id(),
            chunk_config: cfg,
        };
        let store =
            VectorStore::build(dir.path(), manifest, split_pages(&pages, &cfg), embedder.as_ref())
                .await?;
        let retriever = Retriever::new(store, embedder);

        let hits = retriever.retrieve("how do refunds work without a receipt?", 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.page, 2);
        Ok(())
    }
}
