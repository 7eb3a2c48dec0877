use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Totally ordered identifier stamped on every task event.
///
/// Textual form `task_<timestamp_ms>_<sequence>`. Two IDs compare first by
/// timestamp, then by sequence. Generation (owned by the event bus, not this
/// type) guarantees strict monotonicity within a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskEventId {
    timestamp_ms: i64,
    sequence: u64,
}

impl TaskEventId {
    pub fn new(timestamp_ms: i64, sequence: u64) -> Self {
        Self {
            timestamp_ms,
            sequence,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskEventIdError {
    #[error("malformed task event id: {0:?}")]
    Malformed(String),
}

impl FromStr for TaskEventId {
    type Err = TaskEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("task_")
            .ok_or_else(|| TaskEventIdError::Malformed(s.to_string()))?;
        let (ts_part, seq_part) = rest
            .split_once('_')
            .ok_or_else(|| TaskEventIdError::Malformed(s.to_string()))?;

        let timestamp_ms: i64 = ts_part
            .parse()
            .map_err(|_| TaskEventIdError::Malformed(s.to_string()))?;
        let sequence: u64 = seq_part
            .parse()
            .map_err(|_| TaskEventIdError::Malformed(s.to_string()))?;

        Ok(Self {
            timestamp_ms,
            sequence,
        })
    }
}

impl fmt::Display for TaskEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}_{}", self.timestamp_ms, self.sequence)
    }
}

impl TryFrom<String> for TaskEventId {
    type Error = TaskEventIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskEventId> for String {
    fn from(id: TaskEventId) -> Self {
        id.to_string()
    }
}
