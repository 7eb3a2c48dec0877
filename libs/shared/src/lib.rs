//! Ambient building blocks shared across the workspace: tracing setup, the
//! unifying embedder-facing config struct, and the context-hygiene /
//! compaction helpers the agent runner applies to a task's message history.

pub mod compaction;
pub mod config;
pub mod context;
pub mod logging;

pub use compaction::{CompactionEngine, CompactionError, CompactionResult, PassthroughCompactionEngine};
pub use config::{CheckpointPaths, RetryPolicy, ZypherConfig};
pub use context::{ContextConfig, reduce_context};
pub use logging::init_tracing;
