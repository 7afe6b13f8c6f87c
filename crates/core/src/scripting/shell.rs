//! Shell runtime: `bash <entrypoint>`.

use std::path::Path;

use super::process::{ProcessError, ProcessExecutor, ProcessInput, ProcessOutput};
use super::subprocess;

pub struct ShellExecutor;

impl ProcessExecutor for ShellExecutor {
    async fn execute(
        &self,
        path: &Path,
        input: ProcessInput,
    ) -> Result<ProcessOutput, ProcessError> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(ProcessError::NotFound(path.display().to_string()));
        }
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg(path);
        subprocess::run_command(&mut cmd, input).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
