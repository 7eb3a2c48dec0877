use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::process::Command;
use zypher_types::CheckpointInfo;

use crate::error::CheckpointError;

const FIXED_AUTHOR_NAME: &str = "ZypherAgent";
const FIXED_AUTHOR_EMAIL: &str = "zypher@host";
const INITIAL_SUBJECT: &str = "Initial checkpoint repository";
const CHECKPOINT_PREFIX: &str = "CHECKPOINT: ";
const ADVICE_ONLY_SUFFIX: &str = " (advice-only)";
const FIELD_SEP: char = '\u{1f}';

/// Content-addressed snapshots of a workspace directory, kept in a private
/// git metadata directory so the mechanism never touches any VCS the user
/// already has open on the same tree (§4.6).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    work_tree: PathBuf,
    git_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(work_tree: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_tree: work_tree.into(),
            git_dir: git_dir.into(),
        }
    }

    /// Metadata directory under `$HOME/.zypher/checkpoints`, mirroring the
    /// layout convention without keying on a session — one agent instance,
    /// one workspace, one store.
    pub fn in_home(work_tree: impl Into<PathBuf>) -> Self {
        let git_dir = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".zypher").join("checkpoints"))
            .unwrap_or_else(|_| PathBuf::from(".zypher").join("checkpoints"));
        Self::new(work_tree, git_dir)
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Stages the whole work tree and commits it with subject
    /// `CHECKPOINT: <name>`, or `CHECKPOINT: <name> (advice-only)` if
    /// nothing had changed since the previous checkpoint. Initializes the
    /// store on first use.
    pub async fn create_checkpoint(&self, name: &str) -> Result<String, CheckpointError> {
        self.ensure_initialized().await?;
        self.run(&["add", "-A"]).await?;

        let (unchanged, _, _) = self.run_raw(&["diff", "--cached", "--quiet"]).await?;

        let subject = if unchanged {
            format!("{CHECKPOINT_PREFIX}{name}{ADVICE_ONLY_SUFFIX}")
        } else {
            format!("{CHECKPOINT_PREFIX}{name}")
        };

        let mut args = vec!["commit", "-m", subject.as_str()];
        if unchanged {
            args.push("--allow-empty");
        }
        self.run(&args).await?;

        let hash = self.run(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    pub async fn get_checkpoint_details(&self, id: &str) -> Result<CheckpointInfo, CheckpointError> {
        self.verify_exists(id).await?;
        let line = self
            .run(&["show", "-s", "--format=%H%x1f%aI%x1f%s", id])
            .await?;
        self.parse_checkpoint_line(line.trim())
            .await
    }

    /// Commits whose subject begins with `CHECKPOINT:`, plus the initial
    /// marker commit, newest first.
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        if !self.is_initialized().await {
            return Ok(Vec::new());
        }

        let stdout = self.run(&["log", "--format=%H%x1f%aI%x1f%s"]).await?;
        let mut checkpoints = Vec::new();
        for line in stdout.lines().filter(|line| !line.is_empty()) {
            let subject = line.rsplit(FIELD_SEP).next().unwrap_or_default();
            if !is_checkpoint_subject(subject) {
                continue;
            }
            checkpoints.push(self.parse_checkpoint_line(line).await?);
        }
        Ok(checkpoints)
    }

    /// Restores the work tree to the selected commit without moving the
    /// branch HEAD, after taking an automatic safety snapshot of the
    /// current state.
    pub async fn apply_checkpoint(&self, id: &str) -> Result<(), CheckpointError> {
        self.ensure_initialized().await?;
        self.verify_exists(id).await?;

        let prefix: String = id.chars().take(7).collect();
        self.create_checkpoint(&format!("backup-before-applying-{prefix}"))
            .await?;

        self.run(&["read-tree", "--reset", "-u", id]).await?;
        Ok(())
    }

    async fn parse_checkpoint_line(&self, line: &str) -> Result<CheckpointInfo, CheckpointError> {
        let mut parts = line.splitn(3, FIELD_SEP);
        let hash = parts
            .next()
            .ok_or_else(|| CheckpointError::UnexpectedOutput("commit line".into(), line.into()))?;
        let date = parts
            .next()
            .ok_or_else(|| CheckpointError::UnexpectedOutput("commit line".into(), line.into()))?;
        let subject = parts.next().unwrap_or_default();

        let timestamp = DateTime::parse_from_rfc3339(date)
            .map_err(|error| CheckpointError::UnexpectedOutput(date.into(), error.to_string()))?
            .with_timezone(&Utc);

        let files = self.changed_files(hash).await?;

        Ok(CheckpointInfo {
            id: hash.to_string(),
            name: checkpoint_name_from_subject(subject),
            timestamp,
            files,
        })
    }

    async fn changed_files(&self, id: &str) -> Result<Vec<String>, CheckpointError> {
        let stdout = self
            .run(&["diff-tree", "--no-commit-id", "--name-only", "-r", "--root", id])
            .await?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn verify_exists(&self, id: &str) -> Result<(), CheckpointError> {
        let object = format!("{id}^{{commit}}");
        let (exists, _, _) = self.run_raw(&["cat-file", "-e", &object]).await?;
        if exists {
            Ok(())
        } else {
            Err(CheckpointError::NotFound(id.to_string()))
        }
    }

    async fn is_initialized(&self) -> bool {
        tokio::fs::metadata(self.git_dir.join("HEAD")).await.is_ok()
    }

    async fn ensure_initialized(&self) -> Result<(), CheckpointError> {
        if self.is_initialized().await {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.work_tree)
            .await
            .map_err(|error| CheckpointError::Spawn(error.to_string()))?;
        tokio::fs::create_dir_all(&self.git_dir)
            .await
            .map_err(|error| CheckpointError::Spawn(error.to_string()))?;

        self.run(&["init", "-q"]).await?;
        self.run(&["config", "user.name", FIXED_AUTHOR_NAME]).await?;
        self.run(&["config", "user.email", FIXED_AUTHOR_EMAIL]).await?;
        self.run(&["commit", "--allow-empty", "-m", INITIAL_SUBJECT])
            .await?;
        Ok(())
    }

    async fn run_raw(&self, args: &[&str]) -> Result<(bool, String, String), CheckpointError> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(&self.git_dir)
            .arg("--work-tree")
            .arg(&self.work_tree)
            .args(args)
            .output()
            .await
            .map_err(|error| CheckpointError::Spawn(error.to_string()))?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    async fn run(&self, args: &[&str]) -> Result<String, CheckpointError> {
        let (success, stdout, stderr) = self.run_raw(args).await?;
        if !success {
            return Err(CheckpointError::GitFailed {
                command: args.join(" "),
                stderr,
            });
        }
        Ok(stdout)
    }
}

fn is_checkpoint_subject(subject: &str) -> bool {
    subject.starts_with(CHECKPOINT_PREFIX) || subject == INITIAL_SUBJECT
}

fn checkpoint_name_from_subject(subject: &str) -> String {
    match subject.strip_prefix(CHECKPOINT_PREFIX) {
        Some(rest) => rest.strip_suffix(ADVICE_ONLY_SUFFIX).unwrap_or(rest).to_string(),
        None => subject.to_string(),
    }
}
