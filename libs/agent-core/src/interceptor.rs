//! The loop interceptor chain (§4.3): an ordered list of post-inference
//! processors that decide whether a task keeps iterating after each model
//! turn. The first interceptor to return `continue` short-circuits the
//! chain for that turn; a failing interceptor is isolated (logged as an
//! event, chain keeps going) rather than aborting the whole task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zypher_events::TaskEventBus;
use zypher_llm::StopReason;
use zypher_types::{InterceptorDecision, Message, Role, TaskEventKind, ToolDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Complete,
}

impl From<Decision> for InterceptorDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Continue => InterceptorDecision::Continue,
            Decision::Complete => InterceptorDecision::Complete,
        }
    }
}

pub struct InterceptResult {
    pub decision: Decision,
    pub reasoning: Option<String>,
}

impl InterceptResult {
    pub fn complete() -> Self {
        Self {
            decision: Decision::Complete,
            reasoning: None,
        }
    }

    pub fn continue_silent() -> Self {
        Self {
            decision: Decision::Continue,
            reasoning: None,
        }
    }

    pub fn continue_with(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Continue,
            reasoning: Some(reason.into()),
        }
    }
}

/// What an interceptor sees and may mutate: the task's message list, the
/// tools available this turn, the model's stop reason, a cancellation
/// signal, and a handle to the task event bus to publish on.
pub struct InterceptorContext<'a> {
    pub messages: &'a mut Vec<Message>,
    pub tools: &'a [ToolDescriptor],
    pub stop_reason: StopReason,
    pub cancel: &'a CancellationToken,
    pub event_bus: &'a TaskEventBus,
}

impl InterceptorContext<'_> {
    pub fn last_assistant_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(Message::text)
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;
    async fn intercept(&self, ctx: &mut InterceptorContext<'_>) -> Result<InterceptResult, String>;
}

/// Raised by `run_chain` when the cancellation signal fires between two
/// interceptor invocations; the chain stops there without running the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAborted;

/// Runs the chain in order. Before each invocation the cancellation signal
/// is checked; if it has fired, the chain raises `ChainAborted` instead of
/// running the remaining interceptors (including, notably, another tool
/// dispatch). Otherwise returns `Complete` only if every interceptor either
/// completed or errored; the first `continue` stops the chain there. If a
/// `continue` carried a reason and the interceptor didn't itself append a
/// message, the reason is appended as a synthetic user message so the next
/// model turn sees why it's being asked to keep going.
pub async fn run_chain(
    chain: &[Arc<dyn Interceptor>],
    ctx: &mut InterceptorContext<'_>,
) -> Result<Decision, ChainAborted> {
    for interceptor in chain {
        if ctx.cancel.is_cancelled() {
            return Err(ChainAborted);
        }

        let before_len = ctx.messages.len();
        let name = interceptor.name().to_string();
        ctx.event_bus
            .publish(TaskEventKind::InterceptorUse { name: name.clone() });

        match interceptor.intercept(ctx).await {
            Ok(result) => {
                ctx.event_bus.publish(TaskEventKind::InterceptorResult {
                    name: name.clone(),
                    decision: result.decision.into(),
                });

                if result.decision == Decision::Continue {
                    if let Some(reason) = result.reasoning
                        && ctx.messages.len() == before_len
                    {
                        ctx.messages.push(Message::user_text(reason));
                    }
                    return Ok(Decision::Continue);
                }
            }
            Err(error) => {
                ctx.event_bus
                    .publish(TaskEventKind::InterceptorError { name, error });
            }
        }
    }

    Ok(Decision::Complete)
}
