use thiserror::Error;
use zypher_agent_core::RunnerError;
use zypher_checkpoint::CheckpointError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has been disposed")]
    Disposed,
    #[error("no task is currently running")]
    NoActiveTask,
    #[error("wait cancelled")]
    WaitCancelled,
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
