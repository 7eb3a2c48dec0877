//! The compaction collaborator (§4.9): invoked by the runner when a turn's
//! history grows past a configured threshold, before the next model call.
//! Not part of the ordered interceptor chain — it runs on its own trigger,
//! ahead of everything else.

use async_trait::async_trait;
use thiserror::Error;
use zypher_types::Message;

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("compaction failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub messages: Vec<Message>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub truncated: bool,
}

#[async_trait]
pub trait CompactionEngine: Send + Sync {
    async fn compact(&self, messages: Vec<Message>) -> Result<CompactionResult, CompactionError>;
}

/// Default engine: counts whitespace-separated words as a token proxy and
/// never actually drops anything. An embedder wanting real summarization
/// swaps this for a `CompactionEngine` backed by a model call.
#[derive(Debug, Default)]
pub struct PassthroughCompactionEngine;

#[async_trait]
impl CompactionEngine for PassthroughCompactionEngine {
    async fn compact(&self, messages: Vec<Message>) -> Result<CompactionResult, CompactionError> {
        let token_like_count: usize = messages
            .iter()
            .map(|message| message.text())
            .filter(|text| !text.is_empty())
            .map(|text| text.split_whitespace().count())
            .sum();

        Ok(CompactionResult {
            messages,
            tokens_before: token_like_count,
            tokens_after: token_like_count,
            truncated: false,
        })
    }
}
