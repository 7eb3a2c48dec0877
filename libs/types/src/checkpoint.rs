use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// (`id` = opaque content hash, `name`, `timestamp`, `files[]`). A checkpoint
/// exists iff there is a commit object in the checkpoint store with the
/// specific subject prefix `CHECKPOINT:` or the reserved initial entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
}
