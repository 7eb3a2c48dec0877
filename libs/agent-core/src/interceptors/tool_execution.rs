use std::sync::Arc;

use async_trait::async_trait;
use zypher_mcp_manager::McpServerManager;
use zypher_types::{ContentBlock, Message, Role};

use crate::interceptor::{Interceptor, InterceptResult, InterceptorContext};

/// Always runs first in the chain (§4.3). Dispatches every `tool_use` block
/// on the latest assistant message through the server manager concurrently
/// and appends one user message carrying the matching `tool_result` blocks.
/// Returns `continue` whenever it ran any tools; leaves the message list
/// untouched and returns `complete` when there was nothing to execute.
pub struct ToolExecutionInterceptor {
    manager: Arc<McpServerManager>,
}

impl ToolExecutionInterceptor {
    pub fn new(manager: Arc<McpServerManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Interceptor for ToolExecutionInterceptor {
    fn name(&self) -> &str {
        "tool_execution"
    }

    async fn intercept(&self, ctx: &mut InterceptorContext<'_>) -> Result<InterceptResult, String> {
        let Some(last) = ctx.messages.last() else {
            return Ok(InterceptResult::complete());
        };
        if last.role != Role::Assistant {
            return Ok(InterceptResult::complete());
        }

        let calls: Vec<(String, String, serde_json::Value)> = last
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect();

        if calls.is_empty() {
            return Ok(InterceptResult::complete());
        }

        let outcomes = futures::future::join_all(calls.into_iter().map(|(id, name, input)| {
            let manager = self.manager.clone();
            let cancel = ctx.cancel.clone();
            async move {
                let outcome = manager.call_tool(&id, &name, input.clone(), cancel).await;
                (id, name, input, outcome)
            }
        }))
        .await;

        let mut blocks = Vec::with_capacity(outcomes.len());
        for (id, name, input, outcome) in outcomes {
            let (success, content) = match outcome {
                Ok(content) => (true, content),
                Err(error) => (false, vec![ContentBlock::Text { text: error.to_string() }]),
            };
            blocks.push(ContentBlock::ToolResult {
                id,
                name,
                input,
                success,
                content,
            });
        }

        ctx.messages.push(Message::user(blocks));
        Ok(InterceptResult::continue_silent())
    }
}
