//! Shared types of the child-process runtimes.
//!
//! Defines [`ProcessExecutor`], implemented by every runtime, along with
//! [`ProcessInput`], [`ProcessOutput`] and [`ProcessError`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Input handed to a child process.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// JSON document written to the child's stdin.
    pub stdin: Value,
    /// Additional environment variables.
    pub env_vars: Vec<(String, String)>,
    /// Working directory (current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Wall-clock limit before the child is killed.
    pub timeout: Duration,
    /// Receives each stdout line as soon as the child writes it.
    pub stdout_lines: Option<UnboundedSender<String>>,
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` if killed by a signal.
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Script process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Script exited with code {exit_code}: {stderr}")]
    ExitStatus { exit_code: i32, stderr: String },

    #[error("Failed to prepare runtime environment: {0}")]
    Environment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Implemented by each runtime (shell, python, binary).
pub trait ProcessExecutor: Send + Sync {
    /// Run the entrypoint at `path` with `input`.
    ///
    /// A non-zero exit is reported through [`ProcessOutput::exit_code`],
    /// not as an error.
    fn execute(
        &self,
        path: &Path,
        input: ProcessInput,
    ) -> impl std::future::Future<Output = Result<ProcessOutput, ProcessError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
