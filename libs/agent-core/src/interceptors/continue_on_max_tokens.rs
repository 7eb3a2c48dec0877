use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use zypher_llm::StopReason;

use crate::interceptor::{Interceptor, InterceptResult, InterceptorContext};

/// Nudges the model to keep generating when it stopped only because it hit
/// the per-call output token ceiling, up to a bounded number of consecutive
/// continuations so a persistently truncated reply can't loop forever.
/// State (the consecutive-continuation counter) lives inside the
/// interceptor value itself, reset whenever a turn stops for any other
/// reason.
pub struct ContinueOnMaxTokensInterceptor {
    max_continuations: usize,
    consecutive: AtomicUsize,
}

impl ContinueOnMaxTokensInterceptor {
    pub fn new(max_continuations: usize) -> Self {
        Self {
            max_continuations,
            consecutive: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Interceptor for ContinueOnMaxTokensInterceptor {
    fn name(&self) -> &str {
        "continue_on_max_tokens"
    }

    async fn intercept(&self, ctx: &mut InterceptorContext<'_>) -> Result<InterceptResult, String> {
        if ctx.stop_reason != StopReason::MaxTokens {
            self.consecutive.store(0, Ordering::SeqCst);
            return Ok(InterceptResult::complete());
        }

        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.max_continuations {
            return Ok(InterceptResult::complete());
        }

        Ok(InterceptResult::continue_with("Continue."))
    }
}
