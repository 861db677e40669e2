//! Retrieval-augmented answering over a chat completion model.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{QaError, Result};
use crate::openai::OpenAiClient;
use crate::retriever::Retriever;
use crate::utils::clamp_snippet;
use crate::vector_db::ScoredChunk;

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.\n\n\
Chat History:\n{chat_history}\nFollow Up Input: {question}\nStandalone question:";

const ANSWER_TEMPLATE: &str = "Use the following pieces of context to answer the user's question.\n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n{context}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };
        let resp: ChatCompletionResponse = self
            .client
            .post_json("chat", "/v1/chat/completions", &req)
            .await?;
        resp.choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| QaError::remote("chat", None, "response contained no choices"))
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub page: u32,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was conditioned on, best match first.
    pub sources: Vec<SourceRef>,
}

impl Answer {
    /// Distinct source pages in order of first appearance.
    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = Vec::new();
        for source in &self.sources {
            if !pages.contains(&source.page) {
                pages.push(source.page);
            }
        }
        pages
    }
}

pub struct AnswerChain {
    retriever: Retriever,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
}

impl AnswerChain {
    pub fn new(retriever: Retriever, chat: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self {
            retriever,
            chat,
            top_k,
        }
    }

    pub async fn answer(&self, query: &str, history: &[ConversationTurn]) -> Result<Answer> {
        let started = Instant::now();
        if query.trim().is_empty() {
            return Err(QaError::InvalidConfig("query cannot be empty".into()));
        }

        let question = self.standalone_question(query, history).await?;
        let hits = self.retriever.retrieve(&question, self.top_k).await?;
        let messages = answer_messages(&question, &hits);
        let text = self.chat.complete(&messages).await?;

        info!(
            history = history.len(),
            sources = hits.len(),
            latency_ms = started.elapsed().as_millis(),
            "answered query"
        );

        Ok(Answer {
            text: text.trim().to_string(),
            sources: hits
                .iter()
                .map(|h| SourceRef {
                    chunk_id: h.chunk.id,
                    page: h.chunk.page,
                    score: h.score,
                })
                .collect(),
        })
    }

    /// Folds earlier turns into the question so retrieval sees the full intent.
    async fn standalone_question(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(query.to_string());
        }
        let prompt = condense_prompt(query, history);
        let rewritten = self.chat.complete(&[ChatMessage::user(prompt)]).await?;
        let rewritten = rewritten.trim();
        debug!(question = %clamp_snippet(rewritten, 120), "condensed follow-up");
        if rewritten.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }
}

fn condense_prompt(query: &str, history: &[ConversationTurn]) -> String {
    let chat_history = history
        .iter()
        .map(|turn| format!("Human: {}\nAssistant: {}", turn.query, turn.answer))
        .collect::<Vec<_>>()
        .join("\n");
    CONDENSE_TEMPLATE
        .replace("{chat_history}", &chat_history)
        .replace("{question}", query)
}

fn answer_messages(question: &str, hits: &[ScoredChunk]) -> Vec<ChatMessage> {
    let context = hits
        .iter()
        .map(|h| format!("[page {}]\n{}", h.chunk.page, h.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        ChatMessage::system(ANSWER_TEMPLATE.replace("{context}", &context)),
        ChatMessage::user(question),
    ]
}
