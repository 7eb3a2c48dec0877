//! The resume filter (§4.4): a pure function over a replay slice, kept
//! separate from the bus so its two rules are independently testable.

use zypher_types::{TaskEvent, TaskEventId, TaskEventKind};

/// 1. Drops events not strictly after `client_last_event_id` (when given).
/// 2. Drops `tool_use_pending_approval` events strictly before
///    `server_latest_event_id` (when given) — a pending approval the client
///    already observed has since been decided further down the stream.
pub fn resume_filter(
    events: &[TaskEvent],
    client_last_event_id: Option<TaskEventId>,
    server_latest_event_id: Option<TaskEventId>,
) -> Vec<TaskEvent> {
    events
        .iter()
        .filter(|event| match client_last_event_id {
            Some(last) => event.id > last,
            None => true,
        })
        .filter(|event| {
            let is_stale_pending_approval = matches!(
                event.kind,
                TaskEventKind::ToolUsePendingApproval { .. }
            ) && server_latest_event_id.is_some_and(|latest| event.id < latest);
            !is_stale_pending_approval
        })
        .cloned()
        .collect()
}
