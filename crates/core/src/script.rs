//! The contract between the engine and a script.
//!
//! A script is anything implementing [`Script`]. While it runs it gets a
//! [`ScriptContext`] for logging, saving artifacts and reaching the run's
//! transaction. Failures are reported as [`ScriptFailure`], which the
//! engine absorbs into the execution's status and log.

use std::any::type_name;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::{CoreError, CoreResult};
use crate::execution::ScriptExecution;
use crate::form::Fieldset;
use crate::models::{NewScriptArtifact, ScriptArtifact, DEFAULT_WEIGHT};
use crate::status::LogLevel;
use crate::store::{LogSink, Transaction};
use crate::types::{Actor, DbId};

/// Target of the `tracing` events mirrored from script log calls.
pub const SCRIPT_LOG_TARGET: &str = "scriptmgr::script";

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Declared, defaulted metadata of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptMetadata {
    /// Display name; the class name when left empty.
    pub name: String,
    pub description: String,
    pub group: Option<String>,
    pub weight: u16,
    /// Queues offered to operators. Empty means the system default queue.
    pub task_queues: Vec<String>,
    pub field_order: Option<Vec<String>>,
    pub fieldsets: Option<Vec<Fieldset>>,
    pub commit_default: bool,
    /// Execution timeout in seconds.
    pub job_timeout: Option<u64>,
    pub scheduling_enabled: bool,
}

impl Default for ScriptMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            group: None,
            weight: DEFAULT_WEIGHT,
            task_queues: Vec::new(),
            field_order: None,
            fieldsets: None,
            commit_default: true,
            job_timeout: None,
            scheduling_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a script run did not return a value.
///
/// Any `std::error::Error` converts into [`ScriptFailure::Error`], so
/// scripts can use `?` freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFailure {
    /// Deliberate, author-initiated stop.
    Abort(String),
    /// Unexpected error with its type name, message and trace.
    Error {
        kind: String,
        message: String,
        trace: String,
    },
}

impl ScriptFailure {
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort(message.into())
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
            trace: trace.into(),
        }
    }
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort(message) => write!(f, "aborted: {message}"),
            Self::Error { kind, message, .. } => write!(f, "{kind}: {message}"),
        }
    }
}

impl<E> From<E> for ScriptFailure
where
    E: std::error::Error,
{
    fn from(err: E) -> Self {
        let mut trace = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(trace, "Caused by: {cause}");
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            let _ = write!(trace, "{backtrace}");
        }
        Self::Error {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
            trace: trace.trim_end().to_string(),
        }
    }
}

/// `my_crate::errors::Boom<T>` -> `Boom`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Script trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Script: Send + Sync {
    /// Run with cleaned parameters. `commit` tells the script whether its
    /// database changes will be kept.
    async fn run(
        &self,
        ctx: &mut ScriptContext,
        data: &Value,
        commit: bool,
    ) -> Result<Value, ScriptFailure> {
        let _ = (ctx, data, commit);
        Err(ScriptFailure::error(
            "NotImplementedError",
            "The script must define a run() method.",
            "",
        ))
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Artifact content before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
    Bytes(Vec<u8>),
    Text(String),
}

impl From<Vec<u8>> for ArtifactData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for ArtifactData {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for ArtifactData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ArtifactData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl ArtifactData {
    /// Raw bytes, encoding text with the named encoding.
    pub fn into_bytes(self, encoding: &str) -> CoreResult<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Text(text) => encode_text(&text, encoding),
        }
    }
}

/// Encode text the way the named codec would.
///
/// Supports `utf-8`, `utf-16` (BOM + little endian), `utf-16le`,
/// `utf-16be`, `latin-1` and `ascii`, with the usual aliases.
pub fn encode_text(text: &str, encoding: &str) -> CoreResult<Vec<u8>> {
    let normalized = encoding.trim().to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "utf-16" | "utf16" => {
            let mut out = vec![0xFF, 0xFE];
            out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
            Ok(out)
        }
        "utf-16le" | "utf-16-le" => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        "utf-16be" | "utf-16-be" => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
        "latin-1" | "latin1" | "iso-8859-1" => narrow(text, 0xFF, encoding),
        "ascii" | "us-ascii" => narrow(text, 0x7F, encoding),
        _ => Err(CoreError::Validation(format!("Unknown encoding: {encoding}"))),
    }
}

fn narrow(text: &str, max: u32, encoding: &str) -> CoreResult<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .ok()
                .filter(|b| u32::from(*b) <= max)
                .ok_or_else(|| {
                    CoreError::Validation(format!("'{encoding}' codec can't encode character {c:?}"))
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ScriptContext
// ---------------------------------------------------------------------------

/// Execution a context is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBinding {
    pub execution_id: DbId,
    pub task_id: Uuid,
    pub request_id: Uuid,
    pub actor: Actor,
}

impl From<&ScriptExecution> for ExecutionBinding {
    fn from(execution: &ScriptExecution) -> Self {
        Self {
            execution_id: execution.id,
            task_id: execution.task_id,
            request_id: execution.request_id,
            actor: execution.actor.clone(),
        }
    }
}

/// Runtime services of a running script.
pub struct ScriptContext {
    binding: Option<ExecutionBinding>,
    sink: Arc<dyn LogSink>,
    // Only accessed through `&mut self`; the mutex keeps the context `Sync`.
    transaction: Mutex<Option<Box<dyn Transaction>>>,
}

impl ScriptContext {
    /// A context not bound to any execution; every service call fails with
    /// [`CoreError::NoExecutionBound`] until [`ScriptContext::bind`].
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            binding: None,
            sink,
            transaction: Mutex::new(None),
        }
    }

    pub fn for_execution(sink: Arc<dyn LogSink>, execution: &ScriptExecution) -> Self {
        let mut ctx = Self::new(sink);
        ctx.bind(execution);
        ctx
    }

    pub fn bind(&mut self, execution: &ScriptExecution) {
        self.binding = Some(ExecutionBinding::from(execution));
    }

    /// Bind to `execution` on behalf of `actor`.
    pub fn bind_as(&mut self, execution: &ScriptExecution, actor: &Actor) {
        self.binding = Some(ExecutionBinding {
            actor: actor.clone(),
            ..ExecutionBinding::from(execution)
        });
    }

    pub fn binding(&self) -> Option<&ExecutionBinding> {
        self.binding.as_ref()
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.binding.as_ref().map(|b| &b.actor)
    }

    fn execution_id(&self) -> CoreResult<DbId> {
        self.binding
            .as_ref()
            .map(|b| b.execution_id)
            .ok_or(CoreError::NoExecutionBound)
    }

    // ---- Logging ----

    pub async fn log_debug(&self, message: impl fmt::Display) -> CoreResult<()> {
        self.log(LogLevel::Debug, message).await
    }

    pub async fn log_success(&self, message: impl fmt::Display) -> CoreResult<()> {
        self.log(LogLevel::Success, message).await
    }

    pub async fn log_info(&self, message: impl fmt::Display) -> CoreResult<()> {
        self.log(LogLevel::Info, message).await
    }

    pub async fn log_warning(&self, message: impl fmt::Display) -> CoreResult<()> {
        self.log(LogLevel::Warning, message).await
    }

    pub async fn log_failure(&self, message: impl fmt::Display) -> CoreResult<()> {
        self.log(LogLevel::Failure, message).await
    }

    /// Append a log line to the bound execution. Empty messages are
    /// dropped.
    pub async fn log(&self, level: LogLevel, message: impl fmt::Display) -> CoreResult<()> {
        let execution_id = self.execution_id()?;
        let message = message.to_string();
        if message.is_empty() {
            return Ok(());
        }

        match level {
            LogLevel::Debug => tracing::debug!(target: SCRIPT_LOG_TARGET, execution_id, "{message}"),
            LogLevel::Success | LogLevel::Info => {
                tracing::info!(target: SCRIPT_LOG_TARGET, execution_id, %level, "{message}")
            }
            LogLevel::Warning => tracing::warn!(target: SCRIPT_LOG_TARGET, execution_id, "{message}"),
            LogLevel::Failure => tracing::error!(target: SCRIPT_LOG_TARGET, execution_id, "{message}"),
        }

        self.sink.append_log(execution_id, level, &message).await?;
        Ok(())
    }

    // ---- Artifacts ----

    /// Persist a named blob for the bound execution.
    pub async fn save_artifact(
        &self,
        name: &str,
        data: impl Into<ArtifactData>,
        content_type: &str,
        encoding: &str,
    ) -> CoreResult<ScriptArtifact> {
        let execution_id = self.execution_id()?;
        let new = NewScriptArtifact {
            script_execution_id: execution_id,
            name: name.to_string(),
            content_type: content_type.to_string(),
            data: data.into().into_bytes(encoding)?,
        };
        new.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        self.sink.save_artifact(&new).await
    }

    // ---- Transaction ----

    /// The run's transaction as its concrete backend type, if it is one.
    pub fn transaction_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.transaction_slot()
            .as_mut()
            .and_then(|tx| tx.as_any_mut().downcast_mut::<T>())
    }

    pub(crate) fn attach_transaction(&mut self, tx: Box<dyn Transaction>) {
        *self.transaction_slot() = Some(tx);
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Box<dyn Transaction>> {
        self.transaction_slot().take()
    }

    fn transaction_slot(&mut self) -> &mut Option<Box<dyn Transaction>> {
        self.transaction
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
