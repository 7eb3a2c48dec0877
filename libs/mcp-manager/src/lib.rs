//! C2 — owns every registered MCP server's client, multiplexes their status
//! into one event stream alongside approval-gated tool dispatch events, and
//! is the tool-lookup authority the agent runner (C5) calls into.

mod approval;
mod error;
mod manager;
mod registry;
mod tool;

pub use approval::{AlwaysApprove, ApprovalHandler};
pub use error::ManagerError;
pub use manager::{McpServerManager, UpdateServerRequest};
pub use registry::{RegistryResolver, parse_package_identifier};
pub use tool::BuiltinTool;
