use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a message's content sequence. Tagged by `type` so the wire
/// representation matches the provider-facing shape every collaborator
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(flatten)]
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        name: String,
        input: Value,
        success: bool,
        content: Vec<ContentBlock>,
    },
    FileAttachment {
        file_id: String,
        mime_type: String,
    },
    Thinking {
        /// Opaque vendor signature, threaded through unchanged, never
        /// interpreted by the core.
        signature: String,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { data: String, media_type: String },
    Url { url: String },
}

/// Messages are append-mostly; interceptors may append, but any mutation of
/// an earlier message must emit a distinct `history_changed` event (enforced
/// by the session facade, not this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content,
            timestamp: Utc::now(),
            checkpoint_id: None,
            metadata: None,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            checkpoint_id: None,
            metadata: None,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// The tool_use blocks carried by this message's content, if any.
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
            .collect()
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_tags_round_trip() {
        let blocks = vec![
            ContentBlock::Text {
                text: "hi".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "mcp__echo__say".to_string(),
                input: serde_json::json!({"t": "hi"}),
            },
            ContentBlock::ToolResult {
                id: "t1".to_string(),
                name: "mcp__echo__say".to_string(),
                input: serde_json::json!({"t": "hi"}),
                success: true,
                content: vec![ContentBlock::Text {
                    text: "hi".to_string(),
                }],
            },
            ContentBlock::FileAttachment {
                file_id: "f1".to_string(),
                mime_type: "image/png".to_string(),
            },
            ContentBlock::Thinking {
                signature: "sig".to_string(),
                text: "reasoning".to_string(),
            },
        ];

        for block in blocks {
            let json = serde_json::to_string(&block).expect("serialize");
            let back: ContentBlock = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(block, back);
        }
    }

    #[test]
    fn user_text_helper_extracts_text() {
        let message = Message::user_text("hello there");
        assert_eq!(message.text(), "hello there");
        assert_eq!(message.role, Role::User);
    }

    #[test]
    fn tool_uses_filters_non_tool_use_blocks() {
        let message = Message::assistant(vec![
            ContentBlock::Text {
                text: "calling a tool".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "mcp__echo__say".to_string(),
                input: Value::Null,
            },
        ]);
        assert_eq!(message.tool_uses().len(), 1);
    }
}
