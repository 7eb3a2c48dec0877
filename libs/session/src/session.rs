//! The session facade (C8, §4.8): binds the MCP server manager (C2), the
//! agent runner (C3/C5), the checkpoint store (C6), and the attachment cache
//! (C7) to one workspace identity, owns the mutable message history, and
//! exposes the outward `runTask`/`wait`/`clearMessages`/`applyCheckpoint`
//! API. Every operation rejects once the session has been disposed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use zypher_agent_core::{SharedHistory, TaskRunner};
use zypher_checkpoint::CheckpointStore;
use zypher_events::TaskEventBus;
use zypher_mcp_manager::McpServerManager;
use zypher_types::{ContentBlock, Message, TaskEventKind};

use crate::error::SessionError;

/// Optional knobs for a single `runTask` call (§4.8).
#[derive(Debug, Default)]
pub struct RunTaskOptions {
    pub signal: Option<CancellationToken>,
    pub max_iterations: Option<usize>,
}

pub struct Session {
    runner: Arc<TaskRunner>,
    checkpoints: Arc<CheckpointStore>,
    manager: Arc<McpServerManager>,
    history: SharedHistory,
    /// Carries `history_changed` (and, while a task is running, a mirror of
    /// its terminal event) for subscribers who aren't holding the per-task
    /// bus a `runTask` call returned — `clearMessages`/`applyCheckpoint`
    /// mutate history outside of any task, per §4.1's ownership note.
    lifecycle: TaskEventBus,
    current_task: RwLock<Option<TaskEventBus>>,
    disposed: AtomicBool,
}

impl Session {
    pub fn new(runner: Arc<TaskRunner>, checkpoints: Arc<CheckpointStore>, manager: Arc<McpServerManager>) -> Self {
        Self {
            runner,
            checkpoints,
            manager,
            history: Arc::new(RwLock::new(Vec::new())),
            lifecycle: TaskEventBus::new(),
            current_task: RwLock::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }

    /// `runTask(text, attachments?, {signal?, maxIterations?})` (§4.5,
    /// §4.8). Returns the fresh per-task event bus; the caller subscribes to
    /// it directly, or later calls [`Session::wait`] to block on it.
    pub fn run_task(
        &self,
        text: impl Into<String>,
        attachments: Vec<ContentBlock>,
        options: RunTaskOptions,
    ) -> Result<TaskEventBus, SessionError> {
        self.ensure_not_disposed()?;

        let mut content = vec![ContentBlock::Text { text: text.into() }];
        content.extend(attachments);
        let message = Message::user(content);
        let signal = options.signal.unwrap_or_else(CancellationToken::new);

        let bus = self
            .runner
            .run_task(self.history.clone(), message, signal, options.max_iterations)?;

        Ok(bus)
    }

    /// Tracks the bus most recently returned by [`Session::run_task`] so
    /// [`Session::wait`] has something to subscribe to. Kept separate from
    /// `run_task` itself (rather than stored automatically) so a caller that
    /// wants to run two tasks back-to-back without waiting can still do so —
    /// `run_task` rejects overlap at the runner level regardless.
    pub async fn track(&self, bus: TaskEventBus) {
        *self.current_task.write().await = Some(bus);
    }

    /// Convenience: run a task and remember its bus for [`Session::wait`] in
    /// one call, mirroring how most callers actually use the two together.
    pub async fn run_task_and_track(
        &self,
        text: impl Into<String>,
        attachments: Vec<ContentBlock>,
        options: RunTaskOptions,
    ) -> Result<TaskEventBus, SessionError> {
        let bus = self.run_task(text, attachments, options)?;
        self.track(bus.clone()).await;
        Ok(bus)
    }

    /// `wait(signal?)` (§4.8): awaits the currently-running task's terminal
    /// event. Errors if no task has been tracked, or if `signal` fires
    /// first.
    pub async fn wait(&self, signal: Option<CancellationToken>) -> Result<(), SessionError> {
        let bus = {
            let guard = self.current_task.read().await;
            guard.clone().ok_or(SessionError::NoActiveTask)?
        };

        let mut subscription = bus.subscribe();
        if subscription.replay.iter().any(|event| is_terminal(&event.kind)) {
            return Ok(());
        }

        loop {
            let received = match &signal {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(SessionError::WaitCancelled),
                    event = subscription.live.recv() => event,
                },
                None => subscription.live.recv().await,
            };

            match received {
                Ok(event) if is_terminal(&event.kind) => return Ok(()),
                Ok(_) => continue,
                Err(_) => return Ok(()),
            }
        }
    }

    /// `clearMessages()` (§4.8).
    pub async fn clear_messages(&self) -> Result<(), SessionError> {
        self.ensure_not_disposed()?;
        self.history.write().await.clear();
        self.lifecycle.publish(TaskEventKind::HistoryChanged);
        Ok(())
    }

    /// `applyCheckpoint(id)` (§4.8): delegates to the checkpoint store, then
    /// truncates history to the entries strictly before the first message
    /// carrying that checkpoint id.
    pub async fn apply_checkpoint(&self, id: &str) -> Result<(), SessionError> {
        self.ensure_not_disposed()?;
        self.checkpoints.apply_checkpoint(id).await?;

        let mut guard = self.history.write().await;
        if let Some(boundary) = guard.iter().position(|message| message.checkpoint_id.as_deref() == Some(id)) {
            guard.truncate(boundary);
        }
        drop(guard);

        self.lifecycle.publish(TaskEventKind::HistoryChanged);
        Ok(())
    }

    /// `mcp` accessor (§4.8).
    pub fn mcp(&self) -> &Arc<McpServerManager> {
        &self.manager
    }

    /// `messages` read-only snapshot (§4.8).
    pub async fn messages(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    /// Subscribe to `history_changed` notifications raised outside of any
    /// task's own event bus.
    pub fn lifecycle_events(&self) -> TaskEventBus {
        self.lifecycle.clone()
    }

    /// Tears the session down: disposes the MCP server manager (which in
    /// turn disposes every registered client) and closes the lifecycle bus.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.dispose().await;
        self.lifecycle.complete();
    }
}

fn is_terminal(kind: &TaskEventKind) -> bool {
    matches!(
        kind,
        TaskEventKind::Completed { .. } | TaskEventKind::Cancelled { .. } | TaskEventKind::RunError { .. }
    )
}
