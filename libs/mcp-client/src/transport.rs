//! The connected transport seam: a `Transport` is whatever is left once a
//! server handshake completes (list tools, call a tool, tear down). Kept as
//! a trait so the state machine in `client.rs` is unit-testable against a
//! fake transport without a real subprocess or HTTP endpoint.

use crate::auth::AuthProvider;
use crate::error::ConnectError;
use async_trait::async_trait;
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation},
    service::RunningService,
    transport::{
        ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde_json::Value;
use std::sync::Arc;
use zypher_types::{ContentBlock, ServerEndpoint, ServerTransport, ToolDescriptor};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String>;
    async fn call_tool(&self, name: &str, input: Value) -> Result<Vec<ContentBlock>, String>;
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<Box<dyn Transport>, ConnectError>;
}

/// Production connector: dispatches on the endpoint's transport variant and
/// drives a real `rmcp` handshake — a child process over stdio for
/// `command`, a streamable HTTP client for `remote`.
pub struct RmcpConnector;

#[async_trait]
impl TransportConnector for RmcpConnector {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        match &endpoint.transport {
            ServerTransport::Command { command, args, env } => {
                // A local subprocess has no authorization URL to redirect
                // through, so an auth provider attached to this endpoint
                // simply goes unused here.
                let transport = TokioChildProcess::new(tokio::process::Command::new(command).configure(
                    |cmd| {
                        cmd.args(args).envs(env.iter());
                    },
                ))
                .map_err(|error| ConnectError::Transport(error.to_string()))?;

                let client = client_info()
                    .serve(transport)
                    .await
                    .map_err(|error| ConnectError::Transport(error.to_string()))?;

                Ok(Box::new(RmcpTransport { client }))
            }
            ServerTransport::Remote { url, headers } => {
                let mut header_map = reqwest::header::HeaderMap::new();
                for (key, value) in headers {
                    let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                        .map_err(|error| ConnectError::Transport(error.to_string()))?;
                    let value = reqwest::header::HeaderValue::from_str(value)
                        .map_err(|error| ConnectError::Transport(error.to_string()))?;
                    header_map.insert(name, value);
                }

                let http_client = reqwest::Client::builder()
                    .default_headers(header_map)
                    .build()
                    .map_err(|error| ConnectError::Transport(error.to_string()))?;

                let transport = StreamableHttpClientTransport::with_client(
                    http_client,
                    StreamableHttpClientTransportConfig::with_uri(url.clone()),
                );

                match client_info().serve(transport).await {
                    Ok(client) => Ok(Box::new(RmcpTransport { client })),
                    Err(error) => {
                        if let Some(provider) = auth.as_ref() {
                            if is_authorization_required(&error) {
                                provider
                                    .redirect_to_authorization(url)
                                    .await
                                    .map_err(ConnectError::Transport)?;
                                return Err(ConnectError::Redirect(url.clone()));
                            }
                        }
                        Err(ConnectError::Transport(error.to_string()))
                    }
                }
            }
        }
    }
}

/// Whether a handshake failure looks like the server asking for
/// authorization rather than a transport-level fault. `rmcp` doesn't carry a
/// dedicated variant for this over streamable HTTP, so this inspects the
/// error text for the status codes a server uses to demand auth (§4.1
/// "OAuth interception").
fn is_authorization_required(error: &dyn std::fmt::Display) -> bool {
    let text = error.to_string().to_ascii_lowercase();
    text.contains("401") || text.contains("403") || text.contains("unauthorized") || text.contains("forbidden")
}

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "zypher".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

struct RmcpTransport {
    client: RunningService<RoleClient, ClientInfo>,
}

#[async_trait]
impl Transport for RmcpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        let tools = self
            .client
            .list_tools(Default::default())
            .await
            .map_err(|error| error.to_string())?;

        Ok(tools
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: serde_json::to_value(&*tool.input_schema).unwrap_or(Value::Null),
                output_schema: tool
                    .output_schema
                    .as_ref()
                    .map(|schema| serde_json::to_value(&**schema).unwrap_or(Value::Null)),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, input: Value) -> Result<Vec<ContentBlock>, String> {
        let arguments = match input {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => Some(serde_json::Map::from_iter([("input".to_string(), other)])),
        };

        let result = self
            .client
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|error| error.to_string())?;

        Ok(normalize_call_tool_result(result))
    }

    async fn close(self: Box<Self>) {
        let _ = self.client.cancel().await;
    }
}

/// Normalizes an MCP `CallToolResult` into content blocks: text parts pass
/// through, everything else is dropped rather than guessed at (§4.1
/// "result is normalized").
fn normalize_call_tool_result(result: rmcp::model::CallToolResult) -> Vec<ContentBlock> {
    result
        .content
        .iter()
        .filter_map(|content| {
            content
                .raw
                .as_text()
                .map(|text| ContentBlock::Text {
                    text: text.text.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_authorization_errors_by_status_text() {
        for text in ["401 Unauthorized", "server returned 403", "Forbidden: no token"] {
            assert!(is_authorization_required(text), "expected {text:?} to match");
        }
    }

    #[test]
    fn does_not_misclassify_ordinary_transport_errors() {
        for text in ["connection refused", "500 internal server error", "timed out"] {
            assert!(!is_authorization_required(text), "expected {text:?} not to match");
        }
    }
}
