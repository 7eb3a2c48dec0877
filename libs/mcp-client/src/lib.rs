//! C1 — the per-server MCP client state machine (§4.1): reconciles a
//! caller-declared desired state against a realized transport (subprocess
//! or remote HTTP), discovers tools, and surfaces status + OAuth
//! interruption. Owned and multiplexed by `zypher-mcp-manager` (C2).

mod auth;
mod client;
mod error;
mod transport;

pub use auth::AuthProvider;
pub use client::McpClient;
pub use error::{ConnectError, McpClientError};
pub use transport::{RmcpConnector, Transport, TransportConnector};
