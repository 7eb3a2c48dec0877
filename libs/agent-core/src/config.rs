use async_trait::async_trait;

use crate::error::RunnerError;

/// Runner-level knobs (§4.5). `max_iterations` bounds the reason-act loop
/// regardless of how many times interceptors ask to continue; a value of
/// `0` disables the task timeout (only the caller's own cancellation signal
/// applies).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_iterations: usize,
    pub task_timeout_ms: u64,
    pub max_output_tokens: u32,
    pub retry: RetryConfig,
    /// Consecutive `max_tokens` continuations the built-in interceptor will
    /// request before giving up and completing anyway (§4.3's
    /// `continueOnMaxTokens(maxContinuations)`). `usize::MAX` models the
    /// spec's unbounded default.
    pub max_continuations: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            task_timeout_ms: 0,
            max_output_tokens: 4096,
            retry: RetryConfig::default(),
            max_continuations: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl From<&zypher_shared::ZypherConfig> for RetryConfig {
    fn from(config: &zypher_shared::ZypherConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            initial_backoff_ms: config.retry.initial_backoff_ms,
            max_backoff_ms: config.retry.max_backoff_ms,
            multiplier: config.retry.multiplier,
        }
    }
}

impl From<&zypher_shared::ZypherConfig> for RunnerConfig {
    fn from(config: &zypher_shared::ZypherConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            task_timeout_ms: config.task_timeout_ms,
            max_output_tokens: config.max_output_tokens,
            retry: RetryConfig::from(config),
            max_continuations: config.max_continuations,
        }
    }
}

/// Supplies the system prompt for a task. A plain string is the common case;
/// embedders that assemble a prompt from live workspace context (open files,
/// recent commands) bring their own implementation.
#[async_trait]
pub trait SystemPromptLoader: Send + Sync {
    async fn load(&self) -> Result<String, RunnerError>;
}

pub struct StaticSystemPrompt(pub String);

#[async_trait]
impl SystemPromptLoader for StaticSystemPrompt {
    async fn load(&self) -> Result<String, RunnerError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_config_carries_over_zypher_config_fields() {
        let mut shared = zypher_shared::ZypherConfig::default();
        shared.max_iterations = 7;
        shared.retry.max_attempts = 9;

        let runner = RunnerConfig::from(&shared);

        assert_eq!(runner.max_iterations, 7);
        assert_eq!(runner.retry.max_attempts, 9);
    }
}
