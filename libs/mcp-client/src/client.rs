//! The per-server client state machine (§4.1): reconciles a caller-set
//! desired state against a realized transport, discovers tools once
//! connected, and exposes status, OAuth interruption and tool dispatch.

use crate::auth::{AuthProvider, InterceptingAuthProvider};
use crate::error::{ConnectError, McpClientError};
use crate::transport::{RmcpConnector, Transport, TransportConnector};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zypher_types::{
    ConnectedSubstate, ConnectingSubstate, ContentBlock, DesiredState, McpClientSnapshot,
    McpClientStatus, ServerEndpoint, ToolDescriptor,
};

struct Shared {
    transport: RwLock<Option<Box<dyn Transport>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
}

pub struct McpClient {
    endpoint: ServerEndpoint,
    desired_tx: watch::Sender<DesiredState>,
    status_rx: watch::Receiver<McpClientStatus>,
    retry_tx: mpsc::Sender<()>,
    shared: Arc<Shared>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self::with_connector(endpoint, Arc::new(RmcpConnector), None)
    }

    pub fn with_auth(endpoint: ServerEndpoint, auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_connector(endpoint, Arc::new(RmcpConnector), Some(auth))
    }

    pub fn with_connector(
        endpoint: ServerEndpoint,
        connector: Arc<dyn TransportConnector>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        let (desired_tx, desired_rx) = watch::channel(DesiredState::Disconnected);
        let (status_tx, status_rx) = watch::channel(McpClientStatus::Disconnected);
        let (retry_tx, retry_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            transport: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
        });

        let ctx = ActorCtx {
            endpoint: endpoint.clone(),
            connector,
            auth,
            desired_rx,
            status_tx,
            retry_rx,
            shared: shared.clone(),
        };

        let handle = tokio::spawn(run_actor(ctx));

        Self {
            endpoint,
            desired_tx,
            status_rx,
            retry_tx,
            shared,
            actor: Mutex::new(Some(handle)),
        }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn desired_enabled(&self) -> bool {
        matches!(*self.desired_tx.borrow(), DesiredState::Connected)
    }

    /// Setting to the same value is a no-op; reconciliation is async.
    pub fn set_desired_enabled(&self, enabled: bool) {
        let next = if enabled {
            DesiredState::Connected
        } else {
            DesiredState::Disconnected
        };
        self.desired_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub fn status(&self) -> McpClientStatus {
        self.status_rx.borrow().clone()
    }

    /// A clone of the status watch channel, de-duplicated by construction
    /// (tokio's `watch` only wakes on value change).
    pub fn status_stream(&self) -> watch::Receiver<McpClientStatus> {
        self.status_rx.clone()
    }

    pub fn pending_oauth_url(&self) -> Option<String> {
        self.status().pending_oauth_url().map(str::to_string)
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.shared.tools.read().await.clone()
    }

    pub async fn get_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.shared
            .tools
            .read()
            .await
            .iter()
            .find(|tool| tool.name == name)
            .cloned()
    }

    pub async fn tool_count(&self) -> usize {
        self.shared.tools.read().await.len()
    }

    pub async fn snapshot(&self) -> McpClientSnapshot {
        let status = self.status();
        let tools = if status.is_tool_discovered() {
            self.tools().await
        } else {
            Vec::new()
        };
        McpClientSnapshot {
            last_error: status.last_error().map(str::to_string),
            oauth_url: status.pending_oauth_url().map(str::to_string),
            desired_state: *self.desired_tx.borrow(),
            transport: if tools.is_empty() {
                None
            } else {
                Some(self.endpoint.clone())
            },
            tools,
            status,
        }
    }

    /// Succeeds only once the machine reaches `connected.toolDiscovered`
    /// AND `desiredState == connected` (§4.1).
    pub async fn wait_for_connection(
        &self,
        timeout: Duration,
    ) -> Result<(), McpClientError> {
        let mut status_rx = self.status_stream();
        let desired_tx = self.desired_tx.clone();

        let wait = async {
            loop {
                let snapshot = status_rx.borrow().clone();
                if matches!(*desired_tx.borrow(), DesiredState::Connected) {
                    if snapshot.is_tool_discovered() {
                        return Ok(());
                    }
                    if let Some(error) = snapshot.last_error() {
                        return Err(McpClientError::Connection(error.to_string()));
                    }
                } else {
                    return Err(McpClientError::Cancelled);
                }

                if status_rx.changed().await.is_err() {
                    return Err(McpClientError::Connection("client disposed".to_string()));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(McpClientError::Timeout),
        }
    }

    /// Valid only from `error`; any other state is a programming error on
    /// the caller's part, surfaced as `NotInErrorState` rather than panicking.
    pub async fn retry(&self) -> Result<(), McpClientError> {
        if !matches!(self.status(), McpClientStatus::Error { .. }) {
            return Err(McpClientError::NotInErrorState);
        }
        self.retry_tx
            .send(())
            .await
            .map_err(|_| McpClientError::Disposed)
    }

    /// `name` is the namespaced name as exposed by [`Self::tools`]; the
    /// server's original name is recovered before the call crosses the
    /// transport, since the server itself has never heard of the namespace.
    pub async fn execute_tool_call(
        &self,
        name: &str,
        input: Value,
    ) -> Result<Vec<ContentBlock>, McpClientError> {
        let original_name = ToolDescriptor::strip_namespace(&self.endpoint.id, name)
            .ok_or_else(|| McpClientError::ToolNotFound(name.to_string()))?;

        let guard = self.shared.transport.read().await;
        let transport = guard
            .as_ref()
            .ok_or_else(|| McpClientError::Connection("not connected".to_string()))?;
        transport
            .call_tool(original_name, input)
            .await
            .map_err(McpClientError::Connection)
    }

    /// Sets desired=disposed and awaits reaching `disposed` within 30s.
    pub async fn dispose(&self) {
        self.desired_tx.send_modify(|state| *state = DesiredState::Disposed);

        let mut status_rx = self.status_stream();
        let wait_disposed = async {
            loop {
                if self.status().is_terminal() {
                    return;
                }
                if status_rx.changed().await.is_err() {
                    return;
                }
            }
        };

        let _ = tokio::time::timeout(Duration::from_secs(30), wait_disposed).await;

        if let Some(handle) = self.actor.lock().await.take() {
            handle.abort();
        }
    }
}

struct ActorCtx {
    endpoint: ServerEndpoint,
    connector: Arc<dyn TransportConnector>,
    auth: Option<Arc<dyn AuthProvider>>,
    desired_rx: watch::Receiver<DesiredState>,
    status_tx: watch::Sender<McpClientStatus>,
    retry_rx: mpsc::Receiver<()>,
    shared: Arc<Shared>,
}

/// Publishes a status only if it differs from the current value, so
/// `status_stream()` observers see de-duplicated transitions (§4.1 `status$`).
fn set_status(tx: &watch::Sender<McpClientStatus>, status: McpClientStatus) {
    tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}

async fn run_actor(mut ctx: ActorCtx) {
    loop {
        let desired = *ctx.desired_rx.borrow();
        let status = ctx.status_tx.borrow().clone();

        let progressed = reconcile(&mut ctx, status, desired).await;
        if progressed {
            continue;
        }

        if ctx.status_tx.borrow().is_terminal() {
            return;
        }

        tokio::select! {
            changed = ctx.desired_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            Some(()) = ctx.retry_rx.recv() => {
                let status = ctx.status_tx.borrow().clone();
                let desired = *ctx.desired_rx.borrow();
                if matches!(status, McpClientStatus::Error { .. })
                    && desired == DesiredState::Connected
                {
                    attempt_connect(&mut ctx).await;
                }
            }
        }
    }
}

/// Performs one transition step. Returns `true` if the caller should
/// immediately re-evaluate (no external event needed), `false` if the actor
/// should block on the next desired-state change or retry signal.
async fn reconcile(ctx: &mut ActorCtx, status: McpClientStatus, desired: DesiredState) -> bool {
    match (status, desired) {
        (McpClientStatus::Disconnected, DesiredState::Connected) => {
            attempt_connect(ctx).await;
            true
        }
        (McpClientStatus::Disconnected, DesiredState::Disposed) => {
            set_status(&ctx.status_tx, McpClientStatus::Disposed);
            false
        }
        (McpClientStatus::Disconnected, DesiredState::Disconnected) => false,

        (McpClientStatus::Error { .. }, DesiredState::Disconnected) => {
            set_status(&ctx.status_tx, McpClientStatus::Disconnected);
            false
        }
        (McpClientStatus::Error { .. }, DesiredState::Disposed) => {
            set_status(&ctx.status_tx, McpClientStatus::Disposed);
            false
        }
        (McpClientStatus::Error { .. }, DesiredState::Connected) => false,

        (
            McpClientStatus::Connected {
                sub: ConnectedSubstate::Initial,
            },
            DesiredState::Connected,
        ) => {
            discover_tools(ctx).await;
            true
        }
        (
            McpClientStatus::Connected {
                sub: ConnectedSubstate::ToolDiscovered,
            },
            DesiredState::Connected,
        ) => false,
        (McpClientStatus::Connected { .. }, _) => {
            set_status(&ctx.status_tx, McpClientStatus::Disconnecting);
            teardown(ctx).await;
            let next = if desired == DesiredState::Disposed {
                McpClientStatus::Disposed
            } else {
                McpClientStatus::Disconnected
            };
            set_status(&ctx.status_tx, next);
            false
        }

        (McpClientStatus::Connecting { .. }, _) => false,
        (McpClientStatus::Disconnecting, _) => false,
        (McpClientStatus::DisconnectingDueToError, _) => false,
        (McpClientStatus::Aborting, _) => false,
        (McpClientStatus::Disposed, _) => false,
    }
}

async fn attempt_connect(ctx: &mut ActorCtx) {
    set_status(&ctx.status_tx, McpClientStatus::Connecting {
        sub: ConnectingSubstate::Initializing,
    });

    let auth: Option<Arc<dyn AuthProvider>> = ctx.auth.clone().map(|provider| {
        Arc::new(InterceptingAuthProvider::new(provider, ctx.status_tx.clone()))
            as Arc<dyn AuthProvider>
    });

    let cancel = CancellationToken::new();
    let mut desired_rx = ctx.desired_rx.clone();
    let watch_abort = {
        let cancel = cancel.clone();
        async move {
            loop {
                if !matches!(*desired_rx.borrow(), DesiredState::Connected) {
                    cancel.cancel();
                    return;
                }
                if desired_rx.changed().await.is_err() {
                    return;
                }
            }
        }
    };

    let connect_future = ctx.connector.connect(&ctx.endpoint, auth);

    tokio::select! {
        _ = watch_abort => {
            set_status(&ctx.status_tx, McpClientStatus::Aborting);
            set_status(&ctx.status_tx, McpClientStatus::Disconnected);
        }
        result = connect_future => {
            match result {
                Ok(transport) => {
                    *ctx.shared.transport.write().await = Some(transport);
                    set_status(&ctx.status_tx, McpClientStatus::Connected {
                        sub: ConnectedSubstate::Initial,
                    });
                }
                Err(ConnectError::Redirect(_url)) => {
                    // Status already published by InterceptingAuthProvider;
                    // nothing further to do until the caller drives the
                    // external callback and the transport resumes.
                }
                Err(ConnectError::Transport(error)) => {
                    set_status(&ctx.status_tx, McpClientStatus::Error { last_error: error });
                }
            }
        }
    }
}

async fn discover_tools(ctx: &mut ActorCtx) {
    let tools_result = {
        let guard = ctx.shared.transport.read().await;
        match guard.as_ref() {
            Some(transport) => transport.list_tools().await,
            None => Err("transport missing after connect".to_string()),
        }
    };

    match tools_result {
        Ok(tools) => {
            let namespaced = tools
                .into_iter()
                .map(|tool| ToolDescriptor {
                    name: ToolDescriptor::namespaced(&ctx.endpoint.id, &tool.name),
                    ..tool
                })
                .collect();
            *ctx.shared.tools.write().await = namespaced;
            set_status(&ctx.status_tx, McpClientStatus::Connected {
                sub: ConnectedSubstate::ToolDiscovered,
            });
        }
        Err(error) => {
            teardown(ctx).await;
            set_status(&ctx.status_tx, McpClientStatus::Error { last_error: error });
        }
    }
}

async fn teardown(ctx: &mut ActorCtx) {
    ctx.shared.tools.write().await.clear();
    if let Some(transport) = ctx.shared.transport.write().await.take() {
        transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zypher_types::{ServerTransport, ToolDescriptor};

    fn fake_endpoint() -> ServerEndpoint {
        ServerEndpoint {
            id: "echo".to_string(),
            display_name: None,
            transport: ServerTransport::Command {
                command: "echo-mcp".to_string(),
                args: vec![],
                env: Default::default(),
            },
        }
    }

    struct FakeTransport;

    #[async_trait]
    impl Transport for FakeTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
            Ok(vec![ToolDescriptor {
                name: "say".to_string(),
                description: "says things".to_string(),
                input_schema: serde_json::json!({}),
                output_schema: None,
            }])
        }

        async fn call_tool(&self, _name: &str, _input: Value) -> Result<Vec<ContentBlock>, String> {
            Ok(vec![ContentBlock::Text {
                text: "hi".to_string(),
            }])
        }

        async fn close(self: Box<Self>) {}
    }

    struct FakeConnector {
        fail: bool,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportConnector for FakeConnector {
        async fn connect(
            &self,
            _endpoint: &ServerEndpoint,
            _auth: Option<Arc<dyn AuthProvider>>,
        ) -> Result<Box<dyn Transport>, ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ConnectError::Transport("boom".to_string()))
            } else {
                Ok(Box::new(FakeTransport))
            }
        }
    }

    #[tokio::test]
    async fn reaches_tool_discovered_and_namespaces_tools() {
        let client = McpClient::with_connector(
            fake_endpoint(),
            Arc::new(FakeConnector {
                fail: false,
                attempts: Arc::new(AtomicUsize::new(0)),
            }),
            None,
        );

        client.set_desired_enabled(true);
        client
            .wait_for_connection(Duration::from_secs(2))
            .await
            .expect("should connect");

        assert_eq!(client.tool_count().await, 1);
        assert_eq!(client.tools().await[0].name, "mcp__echo__say");
        assert!(client.status().is_tool_discovered());

        client.dispose().await;
    }

    #[tokio::test]
    async fn failed_connect_surfaces_last_error_and_supports_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let client = McpClient::with_connector(
            fake_endpoint(),
            Arc::new(FakeConnector {
                fail: true,
                attempts: attempts.clone(),
            }),
            None,
        );

        client.set_desired_enabled(true);
        let result = client.wait_for_connection(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(McpClientError::Connection(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // retry is only valid from the error state
        client.retry().await.expect("retry from error state");

        client.dispose().await;
    }

    #[tokio::test]
    async fn retry_rejected_outside_error_state() {
        let client = McpClient::with_connector(
            fake_endpoint(),
            Arc::new(FakeConnector {
                fail: false,
                attempts: Arc::new(AtomicUsize::new(0)),
            }),
            None,
        );

        let result = client.retry().await;
        assert!(matches!(result, Err(McpClientError::NotInErrorState)));
    }

    #[tokio::test]
    async fn execute_tool_call_delegates_to_transport() {
        let client = McpClient::with_connector(
            fake_endpoint(),
            Arc::new(FakeConnector {
                fail: false,
                attempts: Arc::new(AtomicUsize::new(0)),
            }),
            None,
        );

        client.set_desired_enabled(true);
        client
            .wait_for_connection(Duration::from_secs(2))
            .await
            .expect("connects");

        let result = client
            .execute_tool_call("mcp__echo__say", serde_json::json!({"t": "hi"}))
            .await
            .expect("call succeeds");

        assert_eq!(result, vec![ContentBlock::Text { text: "hi".to_string() }]);
        client.dispose().await;
    }

    #[tokio::test]
    async fn disabling_then_disposing_reaches_disposed() {
        let client = McpClient::with_connector(
            fake_endpoint(),
            Arc::new(FakeConnector {
                fail: false,
                attempts: Arc::new(AtomicUsize::new(0)),
            }),
            None,
        );

        client.set_desired_enabled(true);
        client
            .wait_for_connection(Duration::from_secs(2))
            .await
            .expect("connects");

        client.dispose().await;
        assert!(client.status().is_terminal());
        assert_eq!(client.tool_count().await, 0);
    }
}
