//! Session bootstrap: everything expensive happens here, once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chunker::{ChunkConfig, split_pages};
use crate::config::Settings;
use crate::document::{fingerprint, load_pdf};
use crate::embedding::{Embedder, LexicalEmbedder, OpenAiEmbedder};
use crate::error::Result;
use crate::llm::{AnswerChain, ChatModel, OpenAiChat};
use crate::openai::{OpenAiClient, RetryPolicy};
use crate::retriever::Retriever;
use crate::session::Session;
use crate::vector_db::{IndexManifest, IndexOutcome, VectorStore};

pub struct QaBot;

impl QaBot {
    /// Builds the remote providers from `settings`, then ingests and indexes the document.
    pub async fn start(settings: &Settings) -> Result<Session> {
        let api_key = settings.require_api_key()?;
        let client = OpenAiClient::new(
            api_key,
            &settings.api_base,
            Duration::from_secs(settings.timeout_secs),
            RetryPolicy {
                max_retries: settings.max_retries,
                ..RetryPolicy::default()
            },
        )?;

        let embedder: Arc<dyn Embedder> = if settings.local_embeddings {
            Arc::new(LexicalEmbedder::default())
        } else {
            Arc::new(OpenAiEmbedder::new(
                client.clone(),
                settings.embedding_model.clone(),
                settings.embed_batch_size,
            ))
        };
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(
            client,
            settings.chat_model.clone(),
            settings.temperature,
        ));

        Self::start_with(settings, embedder, chat).await
    }

    pub async fn start_with(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Session> {
        let chunk_config = ChunkConfig::new(settings.chunk_size, settings.chunk_overlap)?;
        let pages = load_pdf(&settings.pdf_path)?;
        let chunks = split_pages(&pages, &chunk_config);
        info!(
            pages = pages.len(),
            chunks = chunks.len(),
            chunk_size = chunk_config.size(),
            chunk_overlap = chunk_config.overlap(),
            "document chunked"
        );

        let manifest = IndexManifest {
            fingerprint: fingerprint(&settings.pdf_path)?,
            embedding_model: embedder.model_id(),
            chunk_config,
        };
        let (store, outcome) = VectorStore::open_or_build(
            &settings.persist_dir,
            manifest,
            chunks,
            embedder.as_ref(),
            settings.rebuild,
        )
        .await?;
        info!(
            records = store.len(),
            fingerprint = %store.manifest().fingerprint,
            reused = outcome == IndexOutcome::Reused,
            "index ready"
        );
        if store.is_empty() {
            warn!("document has no extractable text; answers will have no context");
        }

        let chain = AnswerChain::new(Retriever::new(store, embedder), chat, settings.top_k);
        Ok(Session::new(chain, settings.exit_keyword.clone(), settings.history_turns)
            .show_sources(settings.show_sources))
    }
}
