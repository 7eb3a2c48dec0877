use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CheckpointError {
    #[error("failed to launch git: {0}")]
    Spawn(String),

    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },

    #[error("checkpoint {0} does not exist")]
    NotFound(String),

    #[error("could not parse git output for {0}: {1}")]
    UnexpectedOutput(String, String),
}
