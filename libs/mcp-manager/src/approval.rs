//! The approval seam (§4.2 step (b)): when attached, every `callTool`
//! invocation pauses for this handler's verdict before execution.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// `true` approves the call; `false` rejects it. The manager supplies
    /// the rejection reason itself ("Rejected by user") — this trait has no
    /// way to customize it.
    async fn approve(
        &self,
        tool_use_id: &str,
        name: &str,
        input: &Value,
        signal: CancellationToken,
    ) -> bool;
}

/// Approves every call unconditionally; the default when no handler is
/// attached means no approval gating happens at all, so this is only used
/// by callers that want the gating machinery exercised without a real human
/// or policy in the loop.
pub struct AlwaysApprove;

#[async_trait]
impl ApprovalHandler for AlwaysApprove {
    async fn approve(
        &self,
        _tool_use_id: &str,
        _name: &str,
        _input: &Value,
        _signal: CancellationToken,
    ) -> bool {
        true
    }
}
