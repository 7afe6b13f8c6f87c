//! Scripts that run as child processes.
//!
//! The child receives one JSON document on stdin:
//!
//! ```json
//! {"data": {...}, "commit": true,
//!  "execution": {"id": 1, "task_id": "...", "request_id": "..."}}
//! ```
//!
//! and reports back with one JSON object per stdout line:
//!
//! | `type`     | fields                                                    |
//! |------------|-----------------------------------------------------------|
//! | `log`      | `level` (default `info`), `message`                       |
//! | `artifact` | `name`, `content_type`, `data` or `data_base64`, `encoding` |
//! | `abort`    | `message`                                                 |
//! | `result`   | `value`                                                   |
//!
//! Any other stdout line is recorded as a debug log line. Lines are
//! handled as the child writes them, so a run that is cut short keeps what
//! it logged so far.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use super::binary::BinaryExecutor;
use super::process::{ProcessError, ProcessExecutor, ProcessInput, ProcessOutput};
use super::python::PythonExecutor;
use super::shell::ShellExecutor;
use super::Runtime;
use crate::script::{ArtifactData, Script, ScriptContext, ScriptFailure};
use crate::status::LogLevel;
use crate::types::DbId;

/// Ceiling for scripts without a declared timeout.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Everything needed to launch an external script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSpec {
    pub runtime: Runtime,
    /// Absolute path of the entrypoint.
    pub entrypoint: PathBuf,
    /// Python requirements file, absolute.
    pub requirements: Option<PathBuf>,
    /// Working directory of the child, the manifest's directory.
    pub working_dir: PathBuf,
    /// Where Python venvs are kept.
    pub venv_root: PathBuf,
    pub timeout: Duration,
}

// ---- Wire types ----

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    data: &'a Value,
    commit: bool,
    execution: Option<EnvelopeExecution>,
}

#[derive(Debug, Serialize)]
struct EnvelopeExecution {
    id: DbId,
    task_id: Uuid,
    request_id: Uuid,
}

/// One line of the stdout protocol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    Log {
        #[serde(default = "default_level")]
        level: LogLevel,
        message: Value,
    },
    Artifact {
        name: String,
        #[serde(default = "default_content_type")]
        content_type: String,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        data_base64: Option<String>,
        #[serde(default = "default_encoding")]
        encoding: String,
    },
    Abort {
        message: String,
    },
    Result {
        #[serde(default)]
        value: Value,
    },
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl ProtocolMessage {
    /// Parse a stdout line; `None` for anything that is not a protocol
    /// message.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// Strings are logged verbatim, other JSON values in their JSON form.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// What the protocol lines of one run amounted to.
#[derive(Debug, Default)]
struct Reply {
    abort: Option<String>,
    result: Value,
}

impl Reply {
    async fn handle(&mut self, ctx: &ScriptContext, line: &str) -> Result<(), ScriptFailure> {
        match ProtocolMessage::parse(line) {
            Some(ProtocolMessage::Log { level, message }) => {
                ctx.log(level, display_value(&message)).await?;
            }
            Some(ProtocolMessage::Artifact {
                name,
                content_type,
                data,
                data_base64,
                encoding,
            }) => {
                let content = match (data_base64, data) {
                    (Some(encoded), _) => ArtifactData::Bytes(BASE64.decode(encoded.trim())?),
                    (None, Some(text)) => ArtifactData::Text(text),
                    (None, None) => ArtifactData::Bytes(Vec::new()),
                };
                ctx.save_artifact(&name, content, &content_type, &encoding)
                    .await?;
            }
            Some(ProtocolMessage::Abort { message }) => self.abort = Some(message),
            Some(ProtocolMessage::Result { value }) => self.result = value,
            None if line.trim().is_empty() => {}
            None => ctx.log_debug(line).await?,
        }
        Ok(())
    }
}

// ---- Script ----

pub struct ExternalScript {
    spec: ExternalSpec,
}

impl ExternalScript {
    pub fn new(spec: ExternalSpec) -> Self {
        Self { spec }
    }

    fn process_input(
        &self,
        ctx: &ScriptContext,
        data: &Value,
        commit: bool,
        stdout_lines: UnboundedSender<String>,
    ) -> ProcessInput {
        let execution = ctx.binding().map(|b| EnvelopeExecution {
            id: b.execution_id,
            task_id: b.task_id,
            request_id: b.request_id,
        });
        let mut env_vars = vec![
            (
                "SCRIPT_PATH".to_string(),
                self.spec.entrypoint.display().to_string(),
            ),
            ("SCRIPT_COMMIT".to_string(), commit.to_string()),
        ];
        if let Some(execution) = &execution {
            env_vars.push(("SCRIPT_EXECUTION_ID".to_string(), execution.id.to_string()));
        }
        let envelope = Envelope {
            data,
            commit,
            execution,
        };
        ProcessInput {
            stdin: serde_json::to_value(&envelope).unwrap_or(Value::Null),
            env_vars,
            working_directory: Some(self.spec.working_dir.clone()),
            timeout: self.spec.timeout,
            stdout_lines: Some(stdout_lines),
        }
    }

    async fn spawn(&self, input: ProcessInput) -> Result<ProcessOutput, ProcessError> {
        let entrypoint = &self.spec.entrypoint;
        match self.spec.runtime {
            Runtime::Shell => ShellExecutor.execute(entrypoint, input).await,
            Runtime::Binary => BinaryExecutor.execute(entrypoint, input).await,
            Runtime::Python => {
                PythonExecutor::new(&self.spec.venv_root)
                    .with_requirements(self.spec.requirements.clone())
                    .execute(entrypoint, input)
                    .await
            }
        }
    }
}

#[async_trait]
impl Script for ExternalScript {
    async fn run(
        &self,
        ctx: &mut ScriptContext,
        data: &Value,
        commit: bool,
    ) -> Result<Value, ScriptFailure> {
        let (lines_tx, mut lines) = mpsc::unbounded_channel();
        let input = self.process_input(ctx, data, commit, lines_tx);
        let process = self.spawn(input);
        tokio::pin!(process);

        let mut reply = Reply::default();
        let output = loop {
            tokio::select! {
                Some(line) = lines.recv() => reply.handle(ctx, &line).await?,
                output = &mut process => break output?,
            }
        };
        // Lines read just before the child exited.
        while let Some(line) = lines.recv().await {
            reply.handle(ctx, &line).await?;
        }

        if let Some(message) = reply.abort {
            return Err(ScriptFailure::Abort(message));
        }
        if !output.success() {
            return Err(ProcessError::ExitStatus {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(reply.result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
