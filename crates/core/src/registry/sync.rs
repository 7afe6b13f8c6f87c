//! `git pull` of the script root.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use crate::error::{CoreError, CoreResult};
use crate::scripting::process::{ProcessError, ProcessInput};
use crate::scripting::subprocess;

/// Git runs inline with the caller, so keep it short.
pub const GIT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Pull the repository containing `dir` and return git's combined output.
pub async fn git_pull(dir: &Path) -> CoreResult<String> {
    pull_with(Command::new("git").arg("pull"), dir, GIT_SYNC_TIMEOUT).await
}

async fn pull_with(cmd: &mut Command, dir: &Path, timeout: Duration) -> CoreResult<String> {
    let input = ProcessInput {
        stdin: Value::Null,
        env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
        working_directory: Some(dir.to_path_buf()),
        timeout,
        stdout_lines: None,
    };
    let failed = |detail: String| {
        CoreError::Sync(format!(
            "Failed to pull git repository at {}: {detail}",
            dir.display()
        ))
    };

    match subprocess::run_command(cmd, input).await {
        Ok(output) if output.success() => Ok(output.combined()),
        Ok(output) => Err(failed(output.combined())),
        Err(ProcessError::Timeout { .. }) => Err(failed(format!(
            "git pull timed out after {}s",
            timeout.as_secs()
        ))),
        Err(e) => Err(failed(e.to_string())),
    }
}
