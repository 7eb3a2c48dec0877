use crate::server::ServerEndpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The caller's target state for an MCP client; the client reconciles
/// asynchronously (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Connected,
    Disconnected,
    Disposed,
}

/// The MCP client's nested state machine value. Substates that carry
/// context (the OAuth redirect URL, the last connection error) hold it
/// inline so the whole value is comparable and cheap to clone for a
/// `status$`-style observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum McpClientStatus {
    Disconnected,
    Connecting { sub: ConnectingSubstate },
    Connected { sub: ConnectedSubstate },
    Disconnecting,
    DisconnectingDueToError,
    Error { last_error: String },
    Aborting,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectedSubstate {
    Initial,
    ToolDiscovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "substate", rename_all = "snake_case")]
pub enum ConnectingSubstate {
    Initializing,
    AwaitingOAuth { oauth_url: String },
}

impl McpClientStatus {
    pub fn pending_oauth_url(&self) -> Option<&str> {
        match self {
            McpClientStatus::Connecting {
                sub: ConnectingSubstate::AwaitingOAuth { oauth_url },
            } => Some(oauth_url.as_str()),
            _ => None,
        }
    }

    pub fn is_tool_discovered(&self) -> bool {
        matches!(
            self,
            McpClientStatus::Connected {
                sub: ConnectedSubstate::ToolDiscovered
            }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, McpClientStatus::Disposed)
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            McpClientStatus::Error { last_error } => Some(last_error.as_str()),
            _ => None,
        }
    }
}

/// (`name`, `description`, `inputSchema`, optional `outputSchema`). The
/// `execute` half of the spec's tuple is deliberately not carried on this
/// value type — it lives one layer up as a keyed dispatch table, so this
/// type stays plain data (serializable, comparable, cheap to list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    /// MCP-sourced tools are namespaced `mcp__<serverId>__<originalName>` so
    /// they are globally unique across servers (§3).
    pub fn namespaced(server_id: &str, original_name: &str) -> String {
        format!("mcp__{server_id}__{original_name}")
    }

    /// Recovers `originalName` from a name produced by [`Self::namespaced`],
    /// so the owning server can be called with the name it actually knows.
    pub fn strip_namespace<'a>(server_id: &str, namespaced_name: &'a str) -> Option<&'a str> {
        namespaced_name.strip_prefix(&format!("mcp__{server_id}__"))
    }
}

/// The tuple (status, desiredState, lastError, oauthUrl, transport, tools)
/// from §3. `tools` is populated only in `connected.toolDiscovered`; it is
/// cleared on any disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpClientSnapshot {
    pub status: McpClientStatus,
    pub desired_state: DesiredState,
    pub last_error: Option<String>,
    pub oauth_url: Option<String>,
    pub transport: Option<ServerEndpoint>,
    pub tools: Vec<ToolDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_mcp_tool_names() {
        assert_eq!(
            ToolDescriptor::namespaced("echo", "say"),
            "mcp__echo__say"
        );
    }

    #[test]
    fn strips_namespace_back_to_original_name() {
        assert_eq!(
            ToolDescriptor::strip_namespace("echo", "mcp__echo__say"),
            Some("say")
        );
        assert_eq!(ToolDescriptor::strip_namespace("other", "mcp__echo__say"), None);
    }

    #[test]
    fn pending_oauth_url_only_defined_in_awaiting_oauth_substate() {
        let awaiting = McpClientStatus::Connecting {
            sub: ConnectingSubstate::AwaitingOAuth {
                oauth_url: "https://example.com/authorize".to_string(),
            },
        };
        assert_eq!(
            awaiting.pending_oauth_url(),
            Some("https://example.com/authorize")
        );

        let initializing = McpClientStatus::Connecting {
            sub: ConnectingSubstate::Initializing,
        };
        assert_eq!(initializing.pending_oauth_url(), None);
    }

    #[test]
    fn tool_discovered_only_true_in_that_substate() {
        let discovered = McpClientStatus::Connected {
            sub: ConnectedSubstate::ToolDiscovered,
        };
        assert!(discovered.is_tool_discovered());

        let initial = McpClientStatus::Connected {
            sub: ConnectedSubstate::Initial,
        };
        assert!(!initial.is_tool_discovered());
    }
}
