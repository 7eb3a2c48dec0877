use crate::event_id::TaskEventId;
use crate::mcp::McpClientStatus;
use crate::message::{ContentBlock, Message};
use crate::usage::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every task event carries its event ID (§3); the payload itself is the
/// tagged union below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: TaskEventId,
    pub kind: TaskEventKind,
}

impl TaskEvent {
    pub fn new(id: TaskEventId, kind: TaskEventKind) -> Self {
        Self { id, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptorDecision {
    Continue,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    User,
    Timeout,
}

/// Tagged union spanning model-stream events, tool-dispatch events,
/// interceptor events, lifecycle events, and transport events (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    // -- model-stream events --
    TextDelta {
        delta: String,
    },
    ToolUseOpen {
        tool_use_id: String,
        name: String,
    },
    ToolUseInputDelta {
        tool_use_id: String,
        partial_json: String,
    },
    Message {
        message: Message,
    },

    // -- tool-dispatch events (forwarded from the MCP server manager,
    //    filtered to just these six variants per §4.5 step 3) --
    ToolUsePendingApproval {
        tool_use_id: String,
        name: String,
        input: Value,
    },
    ToolUseApproved {
        tool_use_id: String,
    },
    ToolUseRejected {
        tool_use_id: String,
        reason: String,
    },
    ToolUseResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
    },
    ToolUseError {
        tool_use_id: String,
        error: String,
    },
    ToolUseCancelled {
        tool_use_id: String,
    },

    // -- interceptor events --
    InterceptorUse {
        name: String,
    },
    InterceptorResult {
        name: String,
        decision: InterceptorDecision,
    },
    InterceptorError {
        name: String,
        error: String,
    },

    // -- lifecycle events --
    Usage {
        usage: TokenUsage,
    },
    Completed {
        total_usage: Option<TokenUsage>,
    },
    Cancelled {
        reason: CancelReason,
    },
    /// A fault inside the runner itself (not a tool or interceptor failure)
    /// tears the task down; this is the terminal event in that case instead
    /// of `completed` or `cancelled` (§7).
    RunError {
        error: String,
    },
    HistoryChanged,

    // -- transport events --
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

/// The MCP server manager's own merged stream (`mcpServerManager.events$`,
/// §4.2/§6), distinct from the per-task event bus: it spans server
/// lifecycle plus the same tool-dispatch vocabulary, but is not stamped with
/// a `TaskEventId` — it isn't part of any single task's ordered history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpManagerEvent {
    ServerAdded {
        server_id: String,
    },
    ServerRemoved {
        server_id: String,
    },
    ServerUpdated {
        server_id: String,
    },
    ClientStatusChanged {
        server_id: String,
        status: McpClientStatus,
    },
    ToolUsePendingApproval {
        tool_use_id: String,
        server_id: Option<String>,
        name: String,
        input: Value,
    },
    ToolUseApproved {
        tool_use_id: String,
    },
    ToolUseRejected {
        tool_use_id: String,
        reason: String,
    },
    ToolUseResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
    },
    ToolUseError {
        tool_use_id: String,
        error: String,
    },
    ToolUseCancelled {
        tool_use_id: String,
    },
}
