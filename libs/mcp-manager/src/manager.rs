//! The server manager (§4.2): owns every registered MCP client, forwards
//! their status into one merged event stream, and is the single place
//! `call_tool` is dispatched from — whether the target is a namespaced MCP
//! tool or a built-in.

use crate::approval::ApprovalHandler;
use crate::error::ManagerError;
use crate::registry::{RegistryResolver, parse_package_identifier};
use crate::tool::BuiltinTool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zypher_mcp_client::{AuthProvider, McpClient};
use zypher_types::{ContentBlock, McpManagerEvent, ServerEndpoint, ServerSource, ToolDescriptor};

/// How long `register_server` waits for an enabled server to reach
/// `connected.toolDiscovered` before giving up. Not specified by the
/// contract; the manager surfaces the client's own terminal `error` state
/// long before this would matter in practice.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REJECTED_BY_USER: &str = "Rejected by user";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct ServerEntry {
    client: Arc<McpClient>,
    source: ServerSource,
    forward: JoinHandle<()>,
}

pub struct UpdateServerRequest {
    pub endpoint: Option<ServerEndpoint>,
    pub enabled: Option<bool>,
}

pub struct McpServerManager {
    servers: RwLock<HashMap<String, ServerEntry>>,
    server_order: RwLock<Vec<String>>,
    builtins: RwLock<HashMap<String, Arc<dyn BuiltinTool>>>,
    builtin_order: RwLock<Vec<String>>,
    registry: Option<Arc<dyn RegistryResolver>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    events_tx: RwLock<Option<broadcast::Sender<McpManagerEvent>>>,
}

impl McpServerManager {
    pub fn new(
        registry: Option<Arc<dyn RegistryResolver>>,
        approval: Option<Arc<dyn ApprovalHandler>>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            servers: RwLock::new(HashMap::new()),
            server_order: RwLock::new(Vec::new()),
            builtins: RwLock::new(HashMap::new()),
            builtin_order: RwLock::new(Vec::new()),
            registry,
            approval,
            events_tx: RwLock::new(Some(tx)),
        }
    }

    fn valid_server_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    async fn emit(&self, event: McpManagerEvent) {
        if let Some(tx) = self.events_tx.read().await.as_ref() {
            let _ = tx.send(event);
        }
    }

    pub async fn events(&self) -> Result<broadcast::Receiver<McpManagerEvent>, ManagerError> {
        self.events_tx
            .read()
            .await
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(ManagerError::Disposed)
    }

    pub async fn register_server(
        &self,
        endpoint: ServerEndpoint,
        enabled: bool,
        source: ServerSource,
        oauth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<(), ManagerError> {
        let events_tx = self
            .events_tx
            .read()
            .await
            .clone()
            .ok_or(ManagerError::Disposed)?;
        if !Self::valid_server_id(&endpoint.id) {
            return Err(ManagerError::InvalidServerId(endpoint.id));
        }
        if self.servers.read().await.contains_key(&endpoint.id) {
            return Err(ManagerError::DuplicateServer(endpoint.id));
        }

        let server_id = endpoint.id.clone();
        let client = Arc::new(match oauth {
            Some(auth) => McpClient::with_auth(endpoint, auth),
            None => McpClient::new(endpoint),
        });

        // server_added must reach subscribers before the first
        // client_status_changed (§4.2), so emit it before the forwarder
        // task is spawned.
        self.emit(McpManagerEvent::ServerAdded {
            server_id: server_id.clone(),
        })
        .await;

        let forward = spawn_status_forwarder(server_id.clone(), client.clone(), events_tx);

        self.servers.write().await.insert(
            server_id.clone(),
            ServerEntry {
                client: client.clone(),
                source,
                forward,
            },
        );
        self.server_order.write().await.push(server_id);

        if enabled {
            client.set_desired_enabled(true);
            client
                .wait_for_connection(DEFAULT_CONNECT_TIMEOUT)
                .await
                .map_err(|error| ManagerError::ExecutionFailed(error.to_string()))?;
        }

        Ok(())
    }

    pub async fn register_server_from_registry(
        &self,
        package_identifier: &str,
        enabled: bool,
        oauth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<(), ManagerError> {
        parse_package_identifier(package_identifier)
            .map_err(ManagerError::InvalidPackageIdentifier)?;

        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| ManagerError::RegistryResolution("no registry configured".to_string()))?;

        let endpoint = registry
            .resolve(package_identifier)
            .await
            .map_err(ManagerError::RegistryResolution)?;

        self.register_server(
            endpoint,
            enabled,
            ServerSource::Registry {
                package_identifier: package_identifier.to_string(),
            },
            oauth,
        )
        .await
    }

    pub async fn deregister_server(&self, id: &str) -> Result<(), ManagerError> {
        let entry = self
            .servers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;

        entry.client.dispose().await;
        entry.forward.abort();

        self.server_order.write().await.retain(|existing| existing != id);

        self.emit(McpManagerEvent::ServerRemoved {
            server_id: id.to_string(),
        })
        .await;

        Ok(())
    }

    pub async fn update_server(
        &self,
        id: &str,
        update: UpdateServerRequest,
    ) -> Result<(), ManagerError> {
        if let Some(new_endpoint) = update.endpoint {
            let (source, enabled) = {
                let servers = self.servers.read().await;
                let entry = servers
                    .get(id)
                    .ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;
                (
                    entry.source.clone(),
                    update.enabled.unwrap_or_else(|| entry.client.desired_enabled()),
                )
            };
            self.deregister_server(id).await?;
            self.register_server(new_endpoint, enabled, source, None)
                .await?;
        } else if let Some(enabled) = update.enabled {
            let servers = self.servers.read().await;
            let entry = servers
                .get(id)
                .ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;
            entry.client.set_desired_enabled(enabled);
        }

        self.emit(McpManagerEvent::ServerUpdated {
            server_id: id.to_string(),
        })
        .await;

        Ok(())
    }

    pub async fn register_tool(&self, tool: Arc<dyn BuiltinTool>) -> Result<(), ManagerError> {
        let name = tool.descriptor().name;
        let mut builtins = self.builtins.write().await;
        if builtins.contains_key(&name) {
            return Err(ManagerError::DuplicateTool(name));
        }
        builtins.insert(name.clone(), tool);
        drop(builtins);
        self.builtin_order.write().await.push(name);
        Ok(())
    }

    /// MCP tools are merged server-by-server in registration order, first
    /// writer wins on an MCP-vs-MCP collision. Built-ins are folded in last
    /// and always overwrite, so they shadow any MCP tool of the same name
    /// (§4.2 `tools`).
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let mut merged: HashMap<String, ToolDescriptor> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for server_id in self.server_order.read().await.iter() {
            if let Some(entry) = self.servers.read().await.get(server_id) {
                for descriptor in entry.client.tools().await {
                    if !merged.contains_key(&descriptor.name) {
                        order.push(descriptor.name.clone());
                        merged.insert(descriptor.name.clone(), descriptor);
                    }
                }
            }
        }

        for name in self.builtin_order.read().await.iter() {
            if let Some(tool) = self.builtins.read().await.get(name) {
                let descriptor = tool.descriptor();
                if !merged.contains_key(&descriptor.name) {
                    order.push(descriptor.name.clone());
                }
                merged.insert(descriptor.name.clone(), descriptor);
            }
        }

        order
            .into_iter()
            .filter_map(|name| merged.remove(&name))
            .collect()
    }

    pub async fn call_tool(
        &self,
        tool_use_id: &str,
        name: &str,
        input: serde_json::Value,
        signal: CancellationToken,
    ) -> Result<Vec<ContentBlock>, ManagerError> {
        let target = self.resolve_target(name).await?;

        if let Some(approval) = &self.approval {
            let server_id = match &target {
                Target::Builtin(_) => None,
                Target::Mcp { server_id, .. } => Some(server_id.clone()),
            };
            self.emit(McpManagerEvent::ToolUsePendingApproval {
                tool_use_id: tool_use_id.to_string(),
                server_id,
                name: name.to_string(),
                input: input.clone(),
            })
            .await;

            let approved = approval
                .approve(tool_use_id, name, &input, signal.clone())
                .await;

            if approved {
                self.emit(McpManagerEvent::ToolUseApproved {
                    tool_use_id: tool_use_id.to_string(),
                })
                .await;
            } else {
                let reason = REJECTED_BY_USER.to_string();
                self.emit(McpManagerEvent::ToolUseRejected {
                    tool_use_id: tool_use_id.to_string(),
                    reason: reason.clone(),
                })
                .await;
                return Err(ManagerError::Rejected(reason));
            }
        }

        if signal.is_cancelled() {
            self.emit(McpManagerEvent::ToolUseCancelled {
                tool_use_id: tool_use_id.to_string(),
            })
            .await;
            return Err(ManagerError::Cancelled);
        }

        let result: Result<Result<Vec<ContentBlock>, String>, ExecOutcome> = tokio::select! {
            biased;
            _ = signal.cancelled() => Err(ExecOutcome::Cancelled),
            outcome = self.execute(&target, input) => Ok(outcome),
        };

        match result {
            Ok(Ok(content)) => {
                self.emit(McpManagerEvent::ToolUseResult {
                    tool_use_id: tool_use_id.to_string(),
                    content: content.clone(),
                })
                .await;
                Ok(content)
            }
            Ok(Err(error)) => {
                self.emit(McpManagerEvent::ToolUseError {
                    tool_use_id: tool_use_id.to_string(),
                    error: error.clone(),
                })
                .await;
                Err(ManagerError::ExecutionFailed(error))
            }
            Err(ExecOutcome::Cancelled) => {
                self.emit(McpManagerEvent::ToolUseCancelled {
                    tool_use_id: tool_use_id.to_string(),
                })
                .await;
                Err(ManagerError::Cancelled)
            }
        }
    }

    async fn resolve_target(&self, name: &str) -> Result<Target, ManagerError> {
        if self.builtins.read().await.contains_key(name) {
            return Ok(Target::Builtin(name.to_string()));
        }

        for server_id in self.server_order.read().await.iter() {
            if let Some(entry) = self.servers.read().await.get(server_id) {
                if entry.client.get_tool(name).await.is_some() {
                    return Ok(Target::Mcp {
                        server_id: server_id.clone(),
                        name: name.to_string(),
                    });
                }
            }
        }

        Err(ManagerError::ToolNotFound(name.to_string()))
    }

    async fn execute(
        &self,
        target: &Target,
        input: serde_json::Value,
    ) -> Result<Vec<ContentBlock>, String> {
        match target {
            Target::Builtin(name) => {
                let tool = self
                    .builtins
                    .read()
                    .await
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("builtin tool disappeared: {name}"))?;
                tool.execute(input, CancellationToken::new()).await
            }
            Target::Mcp { server_id, name } => {
                let client = self
                    .servers
                    .read()
                    .await
                    .get(server_id)
                    .map(|entry| entry.client.clone())
                    .ok_or_else(|| format!("server disappeared: {server_id}"))?;
                client
                    .execute_tool_call(name, input)
                    .await
                    .map_err(|error| error.to_string())
            }
        }
    }

    /// Disposes every client in parallel, stops forwarding their status,
    /// clears the tool table, and completes `events()` for all current and
    /// future subscribers. Idempotent.
    pub async fn dispose(&self) {
        let entries: Vec<ServerEntry> = self.servers.write().await.drain().map(|(_, e)| e).collect();
        self.server_order.write().await.clear();

        let dispose_futures = entries.iter().map(|entry| entry.client.dispose());
        futures::future::join_all(dispose_futures).await;
        for entry in entries {
            entry.forward.abort();
        }

        self.builtins.write().await.clear();
        self.builtin_order.write().await.clear();

        *self.events_tx.write().await = None;
    }
}

enum Target {
    Builtin(String),
    Mcp { server_id: String, name: String },
}

enum ExecOutcome {
    Cancelled,
}

fn spawn_status_forwarder(
    server_id: String,
    client: Arc<McpClient>,
    events_tx: broadcast::Sender<McpManagerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut status_rx = client.status_stream();
        loop {
            let status = status_rx.borrow().clone();
            let _ = events_tx.send(McpManagerEvent::ClientStatusChanged {
                server_id: server_id.clone(),
                status,
            });
            if status_rx.changed().await.is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use zypher_mcp_client::{ConnectError, Transport, TransportConnector};
    use zypher_types::{ServerTransport, ToolDescriptor};

    fn endpoint(id: &str) -> ServerEndpoint {
        ServerEndpoint {
            id: id.to_string(),
            display_name: None,
            transport: ServerTransport::Command {
                command: "echo-mcp".to_string(),
                args: vec![],
                env: Default::default(),
            },
        }
    }

    struct FakeTransport {
        tool_name: &'static str,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
            Ok(vec![ToolDescriptor {
                name: self.tool_name.to_string(),
                description: "fake".to_string(),
                input_schema: json!({}),
                output_schema: None,
            }])
        }

        async fn call_tool(&self, _name: &str, _input: serde_json::Value) -> Result<Vec<ContentBlock>, String> {
            Ok(vec![ContentBlock::Text {
                text: "tool ran".to_string(),
            }])
        }

        async fn close(self: Box<Self>) {}
    }

    struct FakeConnector {
        tool_name: &'static str,
    }

    #[async_trait]
    impl TransportConnector for FakeConnector {
        async fn connect(
            &self,
            _endpoint: &ServerEndpoint,
            _auth: Option<Arc<dyn zypher_mcp_client::AuthProvider>>,
        ) -> Result<Box<dyn Transport>, ConnectError> {
            Ok(Box::new(FakeTransport {
                tool_name: self.tool_name,
            }))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl BuiltinTool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".to_string(),
                description: "built-in echo".to_string(),
                input_schema: json!({}),
                output_schema: None,
            }
        }

        async fn execute(
            &self,
            _input: serde_json::Value,
            _signal: CancellationToken,
        ) -> Result<Vec<ContentBlock>, String> {
            Ok(vec![ContentBlock::Text {
                text: "builtin ran".to_string(),
            }])
        }
    }

    async fn register_fake_server(manager: &McpServerManager, id: &str, tool_name: &'static str) {
        let client = Arc::new(McpClient::with_connector(
            endpoint(id),
            Arc::new(FakeConnector { tool_name }),
            None,
        ));
        client.set_desired_enabled(true);
        client
            .wait_for_connection(Duration::from_secs(2))
            .await
            .expect("fake connects");

        // register_server always drives the real connector, so tests inject
        // an already-connected fake client directly instead.
        manager.servers.write().await.insert(
            id.to_string(),
            ServerEntry {
                forward: spawn_status_forwarder(
                    id.to_string(),
                    client.clone(),
                    manager.events_tx.read().await.clone().expect("not disposed"),
                ),
                client,
                source: ServerSource::Direct,
            },
        );
        manager.server_order.write().await.push(id.to_string());
        manager.emit(McpManagerEvent::ServerAdded {
            server_id: id.to_string(),
        })
        .await;
    }

    #[tokio::test]
    async fn builtin_shadows_mcp_tool_of_the_same_name() {
        let manager = McpServerManager::new(None, None);
        // The fake server's "echo" tool is namespaced to "mcp__srv__echo" by
        // discovery; registering a builtin under that exact name collides.
        register_fake_server(&manager, "srv", "echo").await;
        struct NamespacedEcho;
        #[async_trait]
        impl BuiltinTool for NamespacedEcho {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor {
                    name: "mcp__srv__echo".to_string(),
                    description: "shadowing builtin".to_string(),
                    input_schema: json!({}),
                    output_schema: None,
                }
            }
            async fn execute(
                &self,
                _input: serde_json::Value,
                _signal: CancellationToken,
            ) -> Result<Vec<ContentBlock>, String> {
                Ok(vec![ContentBlock::Text {
                    text: "shadow ran".to_string(),
                }])
            }
        }
        manager
            .register_tool(Arc::new(NamespacedEcho))
            .await
            .expect("registers");

        let tools = manager.tools().await;
        let matching: Vec<_> = tools
            .iter()
            .filter(|t| t.name == "mcp__srv__echo")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].description, "shadowing builtin");
    }

    #[tokio::test]
    async fn call_tool_dispatches_to_builtin() {
        let manager = McpServerManager::new(None, None);
        manager.register_tool(Arc::new(EchoTool)).await.expect("registers");

        let result = manager
            .call_tool("t1", "echo", json!({}), CancellationToken::new())
            .await
            .expect("call succeeds");
        assert_eq!(
            result,
            vec![ContentBlock::Text {
                text: "builtin ran".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn call_tool_dispatches_to_namespaced_mcp_tool() {
        let manager = McpServerManager::new(None, None);
        register_fake_server(&manager, "srv", "say").await;

        let result = manager
            .call_tool("t1", "mcp__srv__say", json!({}), CancellationToken::new())
            .await
            .expect("call succeeds");
        assert_eq!(
            result,
            vec![ContentBlock::Text {
                text: "tool ran".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn call_tool_unknown_name_errors() {
        let manager = McpServerManager::new(None, None);
        let result = manager
            .call_tool("t1", "nope", json!({}), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ManagerError::ToolNotFound(_))));
    }

    struct RejectingApproval;

    #[async_trait]
    impl ApprovalHandler for RejectingApproval {
        async fn approve(
            &self,
            _tool_use_id: &str,
            _name: &str,
            _input: &serde_json::Value,
            _signal: CancellationToken,
        ) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn call_tool_rejected_by_approval_handler_never_executes() {
        let manager = McpServerManager::new(None, Some(Arc::new(RejectingApproval)));
        manager.register_tool(Arc::new(EchoTool)).await.expect("registers");

        let result = manager
            .call_tool("t1", "echo", json!({}), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ManagerError::Rejected(reason)) if reason == "Rejected by user"));
    }

    #[tokio::test]
    async fn dispose_completes_events_and_rejects_further_registration() {
        let manager = McpServerManager::new(None, None);
        register_fake_server(&manager, "srv", "say").await;
        let mut events = manager.events().await.expect("subscribes");

        manager.dispose().await;

        assert!(manager.events().await.is_err());
        let result = manager
            .register_server(endpoint("late"), false, ServerSource::Direct, None)
            .await;
        assert!(matches!(result, Err(ManagerError::Disposed)));

        // draining whatever arrived before close never panics
        while events.try_recv().is_ok() {}
    }
}
