//! Built-in tools (§4.2 `registerTool`): statically implemented, not
//! discovered from an MCP server, but dispatched through the same
//! approval-gated `callTool` path and shadowing MCP tools on name
//! collision.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use zypher_types::{ContentBlock, ToolDescriptor};

#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn execute(
        &self,
        input: Value,
        signal: CancellationToken,
    ) -> Result<Vec<ContentBlock>, String>;
}
