use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ManagerError {
    #[error("server id must match ^[a-zA-Z0-9_-]+$: {0}")]
    InvalidServerId(String),
    #[error("server already registered: {0}")]
    DuplicateServer(String),
    #[error("no such server: {0}")]
    ServerNotFound(String),
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
    #[error("no such tool: {0}")]
    ToolNotFound(String),
    #[error("invalid registry package identifier: {0}")]
    InvalidPackageIdentifier(String),
    #[error("registry resolution failed: {0}")]
    RegistryResolution(String),
    #[error("tool use rejected: {0}")]
    Rejected(String),
    #[error("tool use cancelled")]
    Cancelled,
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("manager is disposed")]
    Disposed,
}
