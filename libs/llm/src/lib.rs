//! The model provider collaborator interface (§6): `streamChat(...)` over a
//! composite cancellation signal, yielding ordered stream events and a final
//! message with stop reason and usage. No concrete vendor SDK lives here —
//! embedders bring their own `ModelProvider` implementation.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use zypher_types::{ContentBlock, Message, TokenUsage, ToolDescriptor};

pub mod stream_assembly;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider stream error: {0}")]
    Stream(String),
    #[error("call cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// Resolves a `file_attachment` content block's `fileId` into a URL the
/// provider can fetch, if the file is known. Implemented by the session
/// layer's attachment cache (C7); defined here so `ModelProvider`
/// implementations can accept one without this crate depending on the
/// session crate.
pub trait AttachmentResolver: Send + Sync {
    fn resolve(&self, file_id: &str) -> Option<String>;
}

/// A resolver that never has anything cached — the default when no
/// attachment cache is wired in.
pub struct NoAttachments;

impl AttachmentResolver for NoAttachments {
    fn resolve(&self, _file_id: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { delta: String },
    ToolUseOpen { tool_use_id: String, name: String },
    ToolUseInputDelta { tool_use_id: String, partial_json: String },
    Message { message: Message },
}

#[derive(Debug, Clone)]
pub struct FinalMessage {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Option<TokenUsage>,
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// A single in-flight streaming call: events are read off `events()`-style
/// consumption by the caller (the runner polls the stream directly), and
/// `final_message()` yields the assembled terminal message once the stream
/// is exhausted.
#[async_trait]
pub trait ChatStream: Send {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, LlmError>>;
    async fn final_message(self: Box<Self>) -> Result<FinalMessage, LlmError>;
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: &tokio_util::sync::CancellationToken,
        attachments: &dyn AttachmentResolver,
    ) -> Result<Box<dyn ChatStream>, LlmError>;
}
