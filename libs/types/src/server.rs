use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one MCP server: a kebab-case `id`, an optional display name,
/// and the transport used to reach it.
///
/// `id` must match `^[a-zA-Z0-9_-]+$`; this is enforced by the server
/// manager at registration time, not by this type, since the same value is
/// also used unvalidated in tests and fixtures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub id: String,
    pub display_name: Option<String>,
    pub transport: ServerTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerTransport {
    Command {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// How a server was registered, carried alongside the endpoint for
/// observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerSource {
    Direct,
    Registry { package_identifier: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_transport_round_trips_through_json() {
        let endpoint = ServerEndpoint {
            id: "echo".to_string(),
            display_name: Some("Echo Server".to_string()),
            transport: ServerTransport::Command {
                command: "echo-mcp".to_string(),
                args: vec!["--stdio".to_string()],
                env: HashMap::new(),
            },
        };

        let json = serde_json::to_string(&endpoint).expect("serialize");
        let back: ServerEndpoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(endpoint, back);
    }

    #[test]
    fn registry_source_carries_package_identifier() {
        let source = ServerSource::Registry {
            package_identifier: "@zypher/echo".to_string(),
        };
        match source {
            ServerSource::Registry { package_identifier } => {
                assert_eq!(package_identifier, "@zypher/echo");
            }
            ServerSource::Direct => panic!("expected registry source"),
        }
    }
}
