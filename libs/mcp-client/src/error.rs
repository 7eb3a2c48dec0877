use thiserror::Error;

/// Errors surfaced while establishing or driving a single server's
/// transport. `Redirect` models an OAuth-aware transport asking the caller
/// to send the end user through an authorization URL before the handshake
/// can complete (§4.1 "OAuth interception").
#[derive(Debug, Error, Clone)]
pub enum ConnectError {
    #[error("authorization required: {0}")]
    Redirect(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error, Clone)]
pub enum McpClientError {
    #[error("connection timed out waiting for tool discovery")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("cancelled: desired state changed before connection completed")]
    Cancelled,
    #[error("retry() is only valid from the error state")]
    NotInErrorState,
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("client is disposed")]
    Disposed,
}
