//! The agent runner (C5, §4.5): drives a single task end to end — takes a
//! checkpoint, streams a model turn, runs the interceptor chain, and
//! repeats until an interceptor says to stop, the iteration ceiling is hit,
//! or the composite cancellation signal fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zypher_checkpoint::CheckpointStore;
use zypher_events::TaskEventBus;
use zypher_llm::{ChatRequest, ModelProvider, StreamEvent};
use zypher_mcp_manager::McpServerManager;
use zypher_shared::{CompactionEngine, ContextConfig};
use zypher_types::{CancelReason, McpManagerEvent, Message, TaskEventKind, TokenUsage};

use crate::attachments::AttachmentCache;
use crate::config::{RunnerConfig, SystemPromptLoader};
use crate::error::RunnerError;
use crate::interceptor::{ChainAborted, Decision, Interceptor, InterceptorContext, run_chain};
use crate::interceptors::{ContinueOnMaxTokensInterceptor, ToolExecutionInterceptor};
use crate::retry::{RetryDelaySource, resolve_retry_delay_ms};

/// A task's shared, mutable message history. The runner mutates it in
/// place; the owner (the session facade, C8) reads it back between tasks.
pub type SharedHistory = Arc<RwLock<Vec<Message>>>;

pub struct TaskRunner {
    provider: Arc<dyn ModelProvider>,
    manager: Arc<McpServerManager>,
    checkpoints: Arc<CheckpointStore>,
    compactor: Arc<dyn CompactionEngine>,
    system_prompt: Arc<dyn SystemPromptLoader>,
    attachments: Arc<dyn AttachmentCache>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    config: RunnerConfig,
    context: ContextConfig,
    running: AtomicBool,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        manager: Arc<McpServerManager>,
        checkpoints: Arc<CheckpointStore>,
        compactor: Arc<dyn CompactionEngine>,
        system_prompt: Arc<dyn SystemPromptLoader>,
        attachments: Arc<dyn AttachmentCache>,
        config: RunnerConfig,
    ) -> Self {
        // Tool Execution must stay first (§4.3 invariant) so a tool_use
        // completion never lingers into the next inference call. The error
        // detector isn't included here: it needs an embedder-chosen command
        // and workspace, wired in via `with_interceptors` instead.
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(ToolExecutionInterceptor::new(manager.clone())),
            Arc::new(ContinueOnMaxTokensInterceptor::new(config.max_continuations)),
        ];

        Self {
            provider,
            manager,
            checkpoints,
            compactor,
            system_prompt,
            attachments,
            interceptors,
            config,
            context: ContextConfig::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Inserts caller-supplied interceptors right after the built-in tool
    /// execution interceptor (which must stay first) and before the rest of
    /// the built-ins.
    pub fn with_interceptors(mut self, extra: Vec<Arc<dyn Interceptor>>) -> Self {
        for (offset, interceptor) in extra.into_iter().enumerate() {
            self.interceptors.insert(1 + offset, interceptor);
        }
        self
    }

    pub fn with_context_config(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts one task. Only one task may run on a given runner at a time;
    /// a second call while one is in flight is rejected immediately rather
    /// than queued. Returns a handle to the task's event bus right away —
    /// the task itself runs in the background and is driven to completion
    /// by a spawned loop, exactly like the MCP client's connection actor.
    pub fn run_task(
        self: &Arc<Self>,
        history: SharedHistory,
        mut user_message: Message,
        external_signal: CancellationToken,
        max_iterations_override: Option<usize>,
    ) -> Result<TaskEventBus, RunnerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunnerError::AlreadyRunning);
        }

        let bus = TaskEventBus::new();
        let runner = self.clone();
        let spawned_bus = bus.clone();
        let max_iterations = max_iterations_override.unwrap_or(self.config.max_iterations);

        tokio::spawn(async move {
            if let Err(error) = runner
                .drive(&history, &mut user_message, &external_signal, &spawned_bus, max_iterations)
                .await
            {
                spawned_bus.publish(TaskEventKind::RunError {
                    error: error.to_string(),
                });
            }
            spawned_bus.complete();
            runner.running.store(false, Ordering::SeqCst);
        });

        Ok(bus)
    }

    async fn drive(
        &self,
        history: &SharedHistory,
        user_message: &mut Message,
        external_signal: &CancellationToken,
        bus: &TaskEventBus,
        max_iterations: usize,
    ) -> Result<(), RunnerError> {
        let (combined, watchers) = composite_cancellation(external_signal.clone(), self.config.task_timeout_ms);

        let forward = self.spawn_tool_event_forwarder(bus.clone());

        let checkpoint_id = self
            .checkpoints
            .create_checkpoint(&format!("task-{}", Utc::now().timestamp_millis()))
            .await?;
        user_message.checkpoint_id = Some(checkpoint_id);

        if let Err(error) = self.attachments.cache_message(&user_message.content).await {
            tracing::warn!(error, "attachment caching failed, continuing without it");
        }

        {
            let mut guard = history.write().await;
            guard.push(user_message.clone());
        }
        bus.publish(TaskEventKind::Message {
            message: user_message.clone(),
        });

        let result = self
            .run_loop(history, &combined, external_signal, bus, max_iterations)
            .await;

        forward.abort();
        for handle in watchers {
            handle.abort();
        }
        result
    }

    async fn run_loop(
        &self,
        history: &SharedHistory,
        combined: &CancellationToken,
        external_signal: &CancellationToken,
        bus: &TaskEventBus,
        max_iterations: usize,
    ) -> Result<(), RunnerError> {
        let mut total_usage = None;
        let mut iterations = 0usize;

        loop {
            if combined.is_cancelled() {
                bus.publish(TaskEventKind::Cancelled {
                    reason: cancel_reason(external_signal),
                });
                return Ok(());
            }

            if iterations >= max_iterations {
                bus.publish(TaskEventKind::Completed {
                    total_usage: total_usage.clone(),
                });
                return Ok(());
            }
            iterations += 1;

            let system = self.system_prompt.load().await?;
            let tools = self.manager.tools().await;
            let messages = self.prepare_context(history).await;

            let request = ChatRequest {
                max_tokens: self.config.max_output_tokens,
                system,
                messages,
                tools: tools.clone(),
                user_id: None,
            };

            let mut stream = self.stream_with_retry(request, combined).await?;

            loop {
                tokio::select! {
                    _ = combined.cancelled() => break,
                    event = stream.next_event() => {
                        match event {
                            Some(Ok(StreamEvent::TextDelta { delta })) => {
                                bus.publish(TaskEventKind::TextDelta { delta });
                            }
                            Some(Ok(StreamEvent::ToolUseOpen { tool_use_id, name })) => {
                                bus.publish(TaskEventKind::ToolUseOpen { tool_use_id, name });
                            }
                            Some(Ok(StreamEvent::ToolUseInputDelta { tool_use_id, partial_json })) => {
                                bus.publish(TaskEventKind::ToolUseInputDelta { tool_use_id, partial_json });
                            }
                            Some(Ok(StreamEvent::Message { message })) => {
                                bus.publish(TaskEventKind::Message { message });
                            }
                            Some(Err(error)) => return Err(error.into()),
                            None => break,
                        }
                    }
                }
            }

            if combined.is_cancelled() {
                bus.publish(TaskEventKind::Cancelled {
                    reason: cancel_reason(external_signal),
                });
                return Ok(());
            }

            let final_message = stream.final_message().await?;
            if let Some(usage) = &final_message.usage {
                bus.publish(TaskEventKind::Usage { usage: *usage });
                total_usage = Some(match total_usage {
                    Some(accumulated) => TokenUsage::add(&accumulated, usage),
                    None => *usage,
                });
            }

            let assistant_message = Message::assistant(final_message.content);
            {
                let mut guard = history.write().await;
                guard.push(assistant_message.clone());
            }
            bus.publish(TaskEventKind::Message {
                message: assistant_message,
            });

            let decision = {
                let mut guard = history.write().await;
                let mut ctx = InterceptorContext {
                    messages: &mut guard,
                    tools: &tools,
                    stop_reason: final_message.stop_reason,
                    cancel: combined,
                    event_bus: bus,
                };
                run_chain(&self.interceptors, &mut ctx).await
            };

            let decision = match decision {
                Ok(decision) => decision,
                Err(ChainAborted) => {
                    bus.publish(TaskEventKind::Cancelled {
                        reason: cancel_reason(external_signal),
                    });
                    return Ok(());
                }
            };

            if decision == Decision::Complete {
                bus.publish(TaskEventKind::Completed {
                    total_usage: total_usage.clone(),
                });
                return Ok(());
            }
        }
    }

    async fn prepare_context(&self, history: &SharedHistory) -> Vec<Message> {
        let snapshot = history.read().await.clone();
        let hygienic = zypher_shared::reduce_context(snapshot, &self.context);
        match self.compactor.compact(hygienic.clone()).await {
            Ok(result) => result.messages,
            Err(error) => {
                tracing::warn!(%error, "compaction failed, using uncompacted context");
                hygienic
            }
        }
    }

    async fn stream_with_retry(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn zypher_llm::ChatStream>, RunnerError> {
        let mut attempt = 1usize;
        loop {
            match self.provider.stream_chat(request.clone(), cancel, self.attachments.as_ref()).await {
                Ok(stream) => return Ok(stream),
                Err(error) if attempt >= self.config.retry.max_attempts => return Err(error.into()),
                Err(zypher_llm::LlmError::Cancelled) => return Err(zypher_llm::LlmError::Cancelled.into()),
                Err(_) => {
                    let delay = resolve_retry_delay_ms(
                        &std::collections::HashMap::new(),
                        &self.config.retry,
                        attempt,
                        Utc::now(),
                    );
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.delay_ms,
                        source = ?delay.source,
                        "retrying model call"
                    );
                    if !matches!(delay.source, RetryDelaySource::ExponentialBackoff) || delay.delay_ms > 0 {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(zypher_llm::LlmError::Cancelled.into()),
                            _ = tokio::time::sleep(Duration::from_millis(delay.delay_ms)) => {}
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn spawn_tool_event_forwarder(&self, bus: TaskEventBus) -> JoinHandle<()> {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            let Ok(mut events) = manager.events().await else {
                return;
            };
            loop {
                match events.recv().await {
                    Ok(McpManagerEvent::ToolUsePendingApproval { tool_use_id, name, input, .. }) => {
                        bus.publish(TaskEventKind::ToolUsePendingApproval { tool_use_id, name, input });
                    }
                    Ok(McpManagerEvent::ToolUseApproved { tool_use_id }) => {
                        bus.publish(TaskEventKind::ToolUseApproved { tool_use_id });
                    }
                    Ok(McpManagerEvent::ToolUseRejected { tool_use_id, reason }) => {
                        bus.publish(TaskEventKind::ToolUseRejected { tool_use_id, reason });
                    }
                    Ok(McpManagerEvent::ToolUseResult { tool_use_id, content }) => {
                        bus.publish(TaskEventKind::ToolUseResult { tool_use_id, content });
                    }
                    Ok(McpManagerEvent::ToolUseError { tool_use_id, error }) => {
                        bus.publish(TaskEventKind::ToolUseError { tool_use_id, error });
                    }
                    Ok(McpManagerEvent::ToolUseCancelled { tool_use_id }) => {
                        bus.publish(TaskEventKind::ToolUseCancelled { tool_use_id });
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    use zypher_llm::{AttachmentResolver, LlmError};
    use zypher_shared::PassthroughCompactionEngine;
    use zypher_types::ContentBlock;

    use crate::attachments::NoAttachmentCache;
    use crate::config::StaticSystemPrompt;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    struct ScriptedStream {
        final_message: FinalMessage,
    }

    #[async_trait::async_trait]
    impl zypher_llm::ChatStream for ScriptedStream {
        async fn next_event(&mut self) -> Option<Result<StreamEvent, LlmError>> {
            None
        }

        async fn final_message(self: Box<Self>) -> Result<FinalMessage, LlmError> {
            Ok(self.final_message)
        }
    }

    /// Replays a fixed script of turns, one per call; the last entry repeats
    /// once the script is exhausted.
    struct ScriptedProvider {
        calls: Arc<AtomicUsize>,
        script: Vec<FinalMessage>,
    }

    #[async_trait::async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _cancel: &CancellationToken,
            _attachments: &dyn AttachmentResolver,
        ) -> Result<Box<dyn zypher_llm::ChatStream>, LlmError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let final_message = self
                .script
                .get(idx)
                .or_else(|| self.script.last())
                .expect("scripted provider needs at least one turn")
                .clone();
            Ok(Box::new(ScriptedStream { final_message }))
        }
    }

    /// Never resolves its stream, so the only way a turn using this provider
    /// ends is external cancellation.
    struct HangingProvider;

    struct HangingStream;

    #[async_trait::async_trait]
    impl zypher_llm::ChatStream for HangingStream {
        async fn next_event(&mut self) -> Option<Result<StreamEvent, LlmError>> {
            std::future::pending().await
        }

        async fn final_message(self: Box<Self>) -> Result<FinalMessage, LlmError> {
            std::future::pending().await
        }
    }

    #[async_trait::async_trait]
    impl ModelProvider for HangingProvider {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _cancel: &CancellationToken,
            _attachments: &dyn AttachmentResolver,
        ) -> Result<Box<dyn zypher_llm::ChatStream>, LlmError> {
            Ok(Box::new(HangingStream))
        }
    }

    fn runner(
        provider: Arc<dyn ModelProvider>,
        config: RunnerConfig,
        work_tree: &Path,
        git_dir: &Path,
    ) -> Arc<TaskRunner> {
        let manager = Arc::new(McpServerManager::new(None, None));
        let checkpoints = Arc::new(CheckpointStore::new(work_tree, git_dir));
        let compactor: Arc<dyn CompactionEngine> = Arc::new(PassthroughCompactionEngine);
        let system_prompt: Arc<dyn SystemPromptLoader> = Arc::new(StaticSystemPrompt("you are a test agent".into()));
        let attachments: Arc<dyn AttachmentCache> = Arc::new(NoAttachmentCache);
        Arc::new(TaskRunner::new(provider, manager, checkpoints, compactor, system_prompt, attachments, config))
    }

    fn text_turn(text: &str, stop_reason: zypher_llm::StopReason) -> FinalMessage {
        FinalMessage {
            content: vec![ContentBlock::Text { text: text.to_string() }],
            stop_reason,
            usage: None,
        }
    }

    async fn recv_until<F>(bus: &TaskEventBus, mut predicate: F) -> TaskEventKind
    where
        F: FnMut(&TaskEventKind) -> bool,
    {
        let mut subscription = bus.subscribe();
        for event in subscription.replay.clone() {
            if predicate(&event.kind) {
                return event.kind;
            }
        }
        loop {
            let event = tokio::time::timeout(StdDuration::from_secs(5), subscription.live.recv())
                .await
                .expect("event within timeout")
                .expect("bus still open");
            if predicate(&event.kind) {
                return event.kind;
            }
        }
    }

    #[tokio::test]
    async fn single_shot_completion_has_exactly_two_messages() {
        if !git_available() {
            return;
        }
        let work_tree = tempfile::TempDir::new().expect("work tree");
        let git_dir = tempfile::TempDir::new().expect("git dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            calls: calls.clone(),
            script: vec![text_turn("hello back", zypher_llm::StopReason::EndTurn)],
        });

        let runner = runner(provider, RunnerConfig::default(), work_tree.path(), git_dir.path());
        let history: SharedHistory = Arc::new(RwLock::new(Vec::new()));

        let bus = runner
            .run_task(history.clone(), Message::user_text("hi"), CancellationToken::new(), None)
            .expect("run_task starts");

        let event = recv_until(&bus, |kind| matches!(kind, TaskEventKind::Completed { .. } | TaskEventKind::RunError { .. })).await;
        assert!(matches!(event, TaskEventKind::Completed { .. }), "expected completed, got {event:?}");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let messages = history.read().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, zypher_types::Role::User);
        assert_eq!(messages[1].role, zypher_types::Role::Assistant);
    }

    #[tokio::test]
    async fn tool_use_round_trips_before_completing() {
        if !git_available() {
            return;
        }
        let work_tree = tempfile::TempDir::new().expect("work tree");
        let git_dir = tempfile::TempDir::new().expect("git dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            calls: calls.clone(),
            script: vec![
                FinalMessage {
                    content: vec![ContentBlock::ToolUse {
                        id: "tc_1".to_string(),
                        name: "zypher__view".to_string(),
                        input: serde_json::json!({"path": "README.md"}),
                    }],
                    stop_reason: zypher_llm::StopReason::ToolUse,
                    usage: None,
                },
                text_turn("done", zypher_llm::StopReason::EndTurn),
            ],
        });

        let runner = runner(provider, RunnerConfig::default(), work_tree.path(), git_dir.path());
        let history: SharedHistory = Arc::new(RwLock::new(Vec::new()));

        let bus = runner
            .run_task(history.clone(), Message::user_text("read the readme"), CancellationToken::new(), None)
            .expect("run_task starts");

        let event = recv_until(&bus, |kind| matches!(kind, TaskEventKind::Completed { .. } | TaskEventKind::RunError { .. })).await;
        assert!(matches!(event, TaskEventKind::Completed { .. }), "expected completed, got {event:?}");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let messages = history.read().await;
        assert!(
            messages
                .iter()
                .any(|message| message.content.iter().any(|block| matches!(block, ContentBlock::ToolResult { .. }))),
            "expected a tool_result message in history"
        );
    }

    #[tokio::test]
    async fn max_tokens_continuation_stops_at_the_configured_cap() {
        if !git_available() {
            return;
        }
        let work_tree = tempfile::TempDir::new().expect("work tree");
        let git_dir = tempfile::TempDir::new().expect("git dir");
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            calls: calls.clone(),
            script: vec![text_turn("truncated...", zypher_llm::StopReason::MaxTokens)],
        });

        let mut config = RunnerConfig::default();
        config.max_continuations = 2;
        let runner = runner(provider, config, work_tree.path(), git_dir.path());
        let history: SharedHistory = Arc::new(RwLock::new(Vec::new()));

        let bus = runner
            .run_task(history.clone(), Message::user_text("keep going"), CancellationToken::new(), None)
            .expect("run_task starts");

        let event = recv_until(&bus, |kind| matches!(kind, TaskEventKind::Completed { .. } | TaskEventKind::RunError { .. })).await;
        assert!(matches!(event, TaskEventKind::Completed { .. }), "expected completed, got {event:?}");

        // One call per continuation attempt, plus the call that finally
        // exceeds the cap: max_continuations + 1.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelling_the_external_signal_ends_the_task_as_cancelled() {
        if !git_available() {
            return;
        }
        let work_tree = tempfile::TempDir::new().expect("work tree");
        let git_dir = tempfile::TempDir::new().expect("git dir");
        let runner = runner(Arc::new(HangingProvider), RunnerConfig::default(), work_tree.path(), git_dir.path());
        let history: SharedHistory = Arc::new(RwLock::new(Vec::new()));
        let external = CancellationToken::new();

        let bus = runner
            .run_task(history.clone(), Message::user_text("start something slow"), external.clone(), None)
            .expect("run_task starts");

        external.cancel();

        let event = recv_until(&bus, |kind| matches!(kind, TaskEventKind::Cancelled { .. } | TaskEventKind::RunError { .. })).await;
        match event {
            TaskEventKind::Cancelled { reason } => assert_eq!(reason, CancelReason::User),
            other => panic!("expected cancelled, got {other:?}"),
        }
    }

}

fn cancel_reason(external_signal: &CancellationToken) -> CancelReason {
    if external_signal.is_cancelled() {
        CancelReason::User
    } else {
        CancelReason::Timeout
    }
}

/// Combines the caller's own signal with an optional task timeout into a
/// single token; `0` disables the timeout leg. Returned join handles are
/// aborted once the owning task is done so neither leaks past it.
fn composite_cancellation(
    external: CancellationToken,
    timeout_ms: u64,
) -> (CancellationToken, Vec<JoinHandle<()>>) {
    let combined = CancellationToken::new();
    let mut handles = Vec::with_capacity(2);

    {
        let combined = combined.clone();
        let external = external.clone();
        handles.push(tokio::spawn(async move {
            external.cancelled().await;
            combined.cancel();
        }));
    }

    if timeout_ms > 0 {
        let combined = combined.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            combined.cancel();
        }));
    }

    (combined, handles)
}
