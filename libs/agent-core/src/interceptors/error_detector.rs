use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::interceptor::{InterceptResult, Interceptor, InterceptorContext};

/// Runs an external command in the workspace after every turn — a linter,
/// a build, a test suite, anything the embedder wants gating the loop — and
/// asks the model to keep going with the captured failure output whenever
/// it exits non-zero (§4.3). A zero exit always completes the chain
/// regardless of the model's own stop reason.
pub struct ExternalErrorDetectorInterceptor {
    command: String,
    args: Vec<String>,
    workspace: PathBuf,
}

impl ExternalErrorDetectorInterceptor {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            workspace: workspace.into(),
        }
    }

    fn description(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[async_trait]
impl Interceptor for ExternalErrorDetectorInterceptor {
    fn name(&self) -> &str {
        "external_error_detector"
    }

    async fn intercept(&self, _ctx: &mut InterceptorContext<'_>) -> Result<InterceptResult, String> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.workspace)
            .output()
            .await
            .map_err(|error| format!("failed to spawn `{}`: {error}", self.description()))?;

        if output.status.success() {
            return Ok(InterceptResult::complete());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let captured = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };

        Ok(InterceptResult::continue_with(format!(
            "`{}` failed:\n{}",
            self.description(),
            captured.trim()
        )))
    }
}
