//! The task event bus (§4.4): stamps, retains, and broadcasts every event
//! emitted over a task's lifetime, injecting heartbeats during quiet
//! periods and replaying history to late subscribers.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use zypher_types::{TaskEvent, TaskEventId, TaskEventKind};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 4096;

pub struct EventSubscription {
    pub replay: Vec<TaskEvent>,
    pub live: broadcast::Receiver<TaskEvent>,
}

struct IdCursor {
    last_timestamp_ms: i64,
    last_sequence: u64,
}

struct Inner {
    cursor: Mutex<IdCursor>,
    ring: Mutex<Vec<TaskEvent>>,
    tx: Mutex<Option<broadcast::Sender<TaskEvent>>>,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Inner {
    fn next_id(&self) -> TaskEventId {
        let mut cursor = lock(&self.cursor);
        let now_ms = Utc::now().timestamp_millis();
        if now_ms > cursor.last_timestamp_ms {
            cursor.last_timestamp_ms = now_ms;
            cursor.last_sequence = 0;
        } else {
            cursor.last_sequence += 1;
        }
        TaskEventId::new(cursor.last_timestamp_ms, cursor.last_sequence)
    }

    fn publish(&self, kind: TaskEventKind) -> TaskEvent {
        let event = TaskEvent::new(self.next_id(), kind);

        *lock(&self.last_activity) = Instant::now();
        lock(&self.ring).push(event.clone());
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(event.clone());
        }

        event
    }
}

/// Live for exactly one task. Cheap to clone; clones share the same
/// underlying state.
#[derive(Clone)]
pub struct TaskEventBus {
    inner: Arc<Inner>,
    heartbeat: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskEventBus {
    pub fn new() -> Self {
        Self::with_heartbeat_interval(DEFAULT_HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat_interval(interval: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            cursor: Mutex::new(IdCursor {
                last_timestamp_ms: 0,
                last_sequence: 0,
            }),
            ring: Mutex::new(Vec::new()),
            tx: Mutex::new(Some(tx)),
            last_activity: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(heartbeat_loop(inner.clone(), interval));

        Self {
            inner,
            heartbeat: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn publish(&self, kind: TaskEventKind) -> TaskEvent {
        self.inner.publish(kind)
    }

    pub fn latest_event_id(&self) -> Option<TaskEventId> {
        lock(&self.inner.ring).last().map(|event| event.id)
    }

    /// Snapshots the ring and subscribes to live delivery as one atomic
    /// step (both happen while the ring's lock is held), so no event can be
    /// published in between and silently skip both the replay and the live
    /// channel.
    pub fn subscribe(&self) -> EventSubscription {
        let ring = lock(&self.inner.ring);
        let live = lock(&self.inner.tx).as_ref().map(|tx| tx.subscribe());

        let replay = ring.clone();
        drop(ring);

        match live {
            Some(live) => EventSubscription { replay, live },
            None => {
                // Closed: hand back a receiver that immediately observes
                // closure rather than panicking or blocking forever.
                let (tx, live) = broadcast::channel(1);
                drop(tx);
                EventSubscription { replay, live }
            }
        }
    }

    /// Same as [`Self::subscribe`], pre-filtered per §4.4's resume rules.
    pub fn subscribe_resuming(
        &self,
        client_last_event_id: Option<TaskEventId>,
        server_latest_event_id: Option<TaskEventId>,
    ) -> EventSubscription {
        let mut subscription = self.subscribe();
        subscription.replay = crate::resume::resume_filter(
            &subscription.replay,
            client_last_event_id,
            server_latest_event_id,
        );
        subscription
    }

    /// Stops the heartbeat timer and drops the broadcast sender, so every
    /// current and future subscriber's live stream observes completion.
    /// Idempotent. Callers publish any terminal event (`completed`,
    /// `cancelled`) before calling this.
    pub fn complete(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
        *lock(&self.inner.tx) = None;
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn heartbeat_loop(inner: Arc<Inner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let elapsed = Instant::now().duration_since(*lock(&inner.last_activity));
        if elapsed < interval {
            continue;
        }

        inner.publish(TaskEventKind::Heartbeat {
            timestamp: Utc::now(),
        });
    }
}
