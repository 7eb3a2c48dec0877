//! Data model shared across every Zypher component: server endpoints, MCP
//! client state, message/content representation, task events, token usage
//! and checkpoint metadata.

mod checkpoint;
mod event;
mod event_id;
mod mcp;
mod message;
mod server;
mod usage;

pub use checkpoint::CheckpointInfo;
pub use event::{CancelReason, InterceptorDecision, McpManagerEvent, TaskEvent, TaskEventKind};
pub use event_id::{TaskEventId, TaskEventIdError};
pub use mcp::{
    ConnectedSubstate, ConnectingSubstate, DesiredState, McpClientSnapshot, McpClientStatus,
    ToolDescriptor,
};
pub use message::{ContentBlock, ImageSource, Message, Role};
pub use server::{ServerEndpoint, ServerSource, ServerTransport};
pub use usage::{InputUsage, OutputUsage, TokenUsage};
