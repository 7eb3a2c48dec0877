//! `ZypherConfig` (§1.1 ambient stack): the one embedder-facing struct that
//! unifies the retry policy, context-window policy, checkpoint paths,
//! heartbeat interval, max iterations and task timeout. It's serde-derived
//! so an embedder can load it straight from TOML via the `toml` crate, the
//! same way the source codebase's own config layer loads its settings file,
//! while each component still takes its own plain constructor arguments —
//! this struct is the thing an embedder builds once and reads fields off of,
//! not a dependency threaded into every crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ContextConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Where the checkpoint store keeps its shadow git repository. Mirrors the
/// two arguments `CheckpointStore::new` already takes; `ZypherConfig` just
/// gives them a home an embedder can serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPaths {
    pub work_tree: PathBuf,
    pub git_dir: PathBuf,
}

impl Default for CheckpointPaths {
    fn default() -> Self {
        Self {
            work_tree: PathBuf::from("."),
            git_dir: PathBuf::from(".zypher/checkpoints"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZypherConfig {
    pub retry: RetryPolicy,
    pub context: ContextConfig,
    pub checkpoint: CheckpointPaths,
    pub heartbeat_interval_ms: u64,
    pub max_iterations: usize,
    pub task_timeout_ms: u64,
    pub max_output_tokens: u32,
    pub max_continuations: usize,
}

impl Default for ZypherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            context: ContextConfig::default(),
            checkpoint: CheckpointPaths::default(),
            heartbeat_interval_ms: 30_000,
            max_iterations: 25,
            task_timeout_ms: 0,
            max_output_tokens: 4_096,
            max_continuations: usize::MAX,
        }
    }
}

impl ZypherConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = ZypherConfig::default();
        let serialized = config.to_toml_string().expect("serialize");
        let parsed = ZypherConfig::from_toml_str(&serialized).expect("parse");
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_for_missing_fields() {
        let parsed = ZypherConfig::from_toml_str("max_iterations = 10\n").expect("parse");
        assert_eq!(parsed.max_iterations, 10);
        assert_eq!(parsed.retry, RetryPolicy::default());
        assert_eq!(parsed.heartbeat_interval_ms, ZypherConfig::default().heartbeat_interval_ms);
    }

    #[test]
    fn heartbeat_interval_converts_millis_to_duration() {
        let mut config = ZypherConfig::default();
        config.heartbeat_interval_ms = 5_000;
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
    }
}
