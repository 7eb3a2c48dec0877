//! Pure functions that keep a task's message history bounded and
//! self-consistent before it goes back to the model: drop superseded tool
//! results, merge same-role runs, truncate old turns, and strip any tool
//! call/result that lost its counterpart along the way.

use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use zypher_types::{ContentBlock, Message, Role};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub keep_last_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            keep_last_messages: usize::MAX,
        }
    }
}

pub fn reduce_context(messages: Vec<Message>, config: &ContextConfig) -> Vec<Message> {
    let messages = dedup_tool_results(messages);
    let messages = merge_consecutive_same_role(messages);
    let messages = truncate_old_tool_results(messages, config.keep_last_messages);
    let messages = truncate_old_assistant_messages(messages, config.keep_last_messages);
    let messages = strip_dangling_tool_calls(messages);
    remove_orphaned_tool_results(messages)
}

/// Keeps only the last `ToolResult` recorded for each tool-use id, dropping
/// earlier duplicates (a tool occasionally gets re-run and the caller keeps
/// both results around until this pass cleans it up).
pub fn dedup_tool_results(mut messages: Vec<Message>) -> Vec<Message> {
    let mut last_positions: HashMap<String, (usize, usize)> = HashMap::new();

    for (message_idx, message) in messages.iter().enumerate() {
        for (block_idx, block) in message.content.iter().enumerate() {
            if let ContentBlock::ToolResult { id, .. } = block {
                last_positions.insert(id.clone(), (message_idx, block_idx));
            }
        }
    }

    for (message_idx, message) in messages.iter_mut().enumerate() {
        let mut block_idx = 0usize;
        message.content.retain(|block| {
            let keep = match block {
                ContentBlock::ToolResult { id, .. } => last_positions
                    .get(id)
                    .is_some_and(|(last_msg, last_block)| {
                        *last_msg == message_idx && *last_block == block_idx
                    }),
                _ => true,
            };
            block_idx += 1;
            keep
        });
    }

    remove_empty_messages(messages)
}

/// Merges runs of consecutive messages with the same role into one, so a
/// tool-call message and its immediately following tool-result message
/// collapse together once the model no longer needs them separated.
pub fn merge_consecutive_same_role(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());

    for message in messages {
        let Some(previous) = merged.last_mut() else {
            merged.push(message);
            continue;
        };

        if previous.role == message.role {
            previous.content.extend(message.content);
        } else {
            merged.push(message);
        }
    }

    remove_empty_messages(merged)
}

pub fn truncate_old_tool_results(messages: Vec<Message>, keep_last_n: usize) -> Vec<Message> {
    if keep_last_n == usize::MAX {
        return messages;
    }

    let mut positions: Vec<(usize, usize)> = Vec::new();
    for (message_idx, message) in messages.iter().enumerate() {
        for (block_idx, block) in message.content.iter().enumerate() {
            if matches!(block, ContentBlock::ToolResult { .. }) {
                positions.push((message_idx, block_idx));
            }
        }
    }

    if positions.len() <= keep_last_n {
        return messages;
    }

    let keep_from = positions.len().saturating_sub(keep_last_n);
    let keep_set: HashSet<(usize, usize)> = positions.into_iter().skip(keep_from).collect();

    let mut truncated = messages;
    for (message_idx, message) in truncated.iter_mut().enumerate() {
        let mut block_idx = 0usize;
        message.content.retain(|block| {
            let keep = match block {
                ContentBlock::ToolResult { .. } => keep_set.contains(&(message_idx, block_idx)),
                _ => true,
            };
            block_idx += 1;
            keep
        });
    }

    remove_empty_messages(truncated)
}

const TRUNCATED_ASSISTANT_PLACEHOLDER: &str = "[assistant message truncated]";

pub fn truncate_old_assistant_messages(mut messages: Vec<Message>, keep_last_n: usize) -> Vec<Message> {
    if keep_last_n == usize::MAX {
        return messages;
    }

    let assistant_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter_map(|(idx, message)| (message.role == Role::Assistant).then_some(idx))
        .collect();

    if assistant_indices.len() <= keep_last_n {
        return messages;
    }

    let keep_start = assistant_indices.len().saturating_sub(keep_last_n);
    let keep_indices: HashSet<usize> = assistant_indices.into_iter().skip(keep_start).collect();

    for (idx, message) in messages.iter_mut().enumerate() {
        if message.role != Role::Assistant || keep_indices.contains(&idx) {
            continue;
        }

        message.content.retain(|block| matches!(block, ContentBlock::ToolUse { .. }));
        if message.content.is_empty() {
            message.content = vec![ContentBlock::Text {
                text: TRUNCATED_ASSISTANT_PLACEHOLDER.to_string(),
            }];
        }
    }

    messages
}

/// Drops a `ToolUse` block when the immediately following message doesn't
/// carry a matching `ToolResult` for it — a tool call left hanging because
/// the turn was interrupted before the result came back.
pub fn strip_dangling_tool_calls(mut messages: Vec<Message>) -> Vec<Message> {
    for idx in 0..messages.len() {
        let tool_use_ids: Vec<String> = messages[idx]
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();

        if tool_use_ids.is_empty() {
            continue;
        }

        let next_results: HashSet<String> = messages
            .get(idx + 1)
            .map(|message| {
                message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult { id, .. } => Some(id.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let has_immediate_results = !next_results.is_empty()
            && tool_use_ids.iter().all(|id| next_results.contains(id));

        if has_immediate_results {
            continue;
        }

        messages[idx]
            .content
            .retain(|block| !matches!(block, ContentBlock::ToolUse { .. }));
    }

    remove_empty_messages(messages)
}

/// Drops a `ToolResult` whose originating `ToolUse` id was never seen
/// earlier in the history (left over after a compaction or a resumed task
/// dropped the call that produced it).
pub fn remove_orphaned_tool_results(mut messages: Vec<Message>) -> Vec<Message> {
    let mut seen_tool_uses: HashSet<String> = HashSet::new();

    for message in &mut messages {
        for block in &message.content {
            if let ContentBlock::ToolUse { id, .. } = block {
                seen_tool_uses.insert(id.clone());
            }
        }

        message.content.retain(|block| match block {
            ContentBlock::ToolResult { id, .. } => seen_tool_uses.contains(id),
            _ => true,
        });
    }

    remove_empty_messages(messages)
}

fn remove_empty_messages(messages: Vec<Message>) -> Vec<Message> {
    messages.into_iter().filter(|m| !m.content.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_use_message(id: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4(),
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: id.to_string(),
                name: "zypher__view".to_string(),
                input: json!({"path": "README.md"}),
            }],
            timestamp: chrono::Utc::now(),
            checkpoint_id: None,
            metadata: None,
        }
    }

    fn tool_result_message(id: &str, value: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4(),
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                id: id.to_string(),
                name: "zypher__view".to_string(),
                input: json!({}),
                success: true,
                content: vec![ContentBlock::Text { text: value.to_string() }],
            }],
            timestamp: chrono::Utc::now(),
            checkpoint_id: None,
            metadata: None,
        }
    }

    #[test]
    fn dedup_keeps_last_tool_result_per_tool_use_id() {
        let reduced = dedup_tool_results(vec![
            tool_use_message("tc_1"),
            tool_result_message("tc_1", "old"),
            tool_result_message("tc_1", "new"),
        ]);

        assert_eq!(reduced.len(), 2);
        match &reduced[1].content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert!(matches!(&content[0], ContentBlock::Text { text } if text == "new"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn merge_consecutive_same_role_merges_user_turns() {
        let merged = merge_consecutive_same_role(vec![
            tool_result_message("tc_1", "result_1"),
            tool_result_message("tc_2", "result_2"),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content.len(), 2);
    }

    #[test]
    fn remove_orphaned_tool_results_removes_missing_references() {
        let reduced = remove_orphaned_tool_results(vec![
            tool_result_message("tc_missing", "orphan"),
            tool_use_message("tc_1"),
            tool_result_message("tc_1", "ok"),
        ]);

        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].role, Role::Assistant);
        assert_eq!(reduced[1].role, Role::User);
    }

    #[test]
    fn strip_dangling_tool_calls_removes_unresolved_tool_uses() {
        let reduced = reduce_context(
            vec![
                tool_use_message("tc_1"),
                Message::user_text("new user prompt"),
                tool_result_message("tc_1", "late result"),
            ],
            &ContextConfig::default(),
        );

        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced[0].role, Role::User);
    }

    #[test]
    fn full_reduce_pipeline_runs_in_expected_order() {
        let config = ContextConfig { keep_last_messages: 2 };

        let reduced = reduce_context(
            vec![
                tool_use_message("tc_1"),
                tool_result_message("tc_1", "old"),
                tool_result_message("tc_1", "new"),
            ],
            &config,
        );

        assert_eq!(reduced.len(), 2);
    }
}
