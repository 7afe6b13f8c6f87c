//! Binary runtime: the entrypoint is executed directly.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::process::{ProcessError, ProcessExecutor, ProcessInput, ProcessOutput};
use super::subprocess;

pub struct BinaryExecutor;

impl ProcessExecutor for BinaryExecutor {
    async fn execute(
        &self,
        path: &Path,
        input: ProcessInput,
    ) -> Result<ProcessOutput, ProcessError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| ProcessError::NotFound(path.display().to_string()))?;

        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(ProcessError::PermissionDenied(format!(
                "{} is not executable (mode {mode:#o})",
                path.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(path);
        subprocess::run_command(&mut cmd, input).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
