use thiserror::Error;
use zypher_checkpoint::CheckpointError;
use zypher_llm::LlmError;
use zypher_mcp_manager::ManagerError;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("a task is already running on this runner")]
    AlreadyRunning,
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error(transparent)]
    Tool(#[from] ManagerError),
    #[error("system prompt unavailable: {0}")]
    SystemPrompt(String),
}
