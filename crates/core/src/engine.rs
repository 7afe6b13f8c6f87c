//! Runs one script execution end to end.
//!
//! [`Engine::run_script`] owns the execution's lifecycle: it starts the
//! record, scopes the script's writes to a transaction that is committed
//! only for a successful run with `commit = true`, turns every script
//! failure into log lines and a terminal status, and chains the next run
//! of a recurring execution.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::execution::ScriptExecution;
use crate::queue::{QueueAdapter, ScriptJob};
use crate::registry::Registry;
use crate::script::{ScriptContext, ScriptFailure};
use crate::status::{ExecutionStatus, LogLevel};
use crate::store::{ChangeTracker, LogSink, NoopChangeTracker, ScriptStore, Transaction};
use crate::types::Actor;

pub const REVERTED_DRY_RUN: &str = "Database changes have been reverted automatically.";
pub const REVERTED_ON_ERROR: &str = "Database changes have been reverted due to error.";

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: ExecutionStatus,
    /// Follow-up execution created for a recurring run.
    pub next_execution: Option<ScriptExecution>,
}

/// How the script call itself ended.
enum Outcome {
    Returned(Value),
    Failed(ScriptFailure),
    TimedOut(Duration),
}

pub struct Engine {
    store: Arc<dyn ScriptStore>,
    sink: Arc<dyn LogSink>,
    queue: Arc<dyn QueueAdapter>,
    registry: Arc<Registry>,
    changes: Arc<dyn ChangeTracker>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ScriptStore>,
        sink: Arc<dyn LogSink>,
        queue: Arc<dyn QueueAdapter>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            store,
            sink,
            queue,
            registry,
            changes: Arc::new(NoopChangeTracker),
        }
    }

    pub fn with_change_tracker(mut self, changes: Arc<dyn ChangeTracker>) -> Self {
        self.changes = changes;
        self
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    pub fn queue(&self) -> &Arc<dyn QueueAdapter> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run a queued job. Returns `None` when its execution no longer
    /// exists, e.g. because an operator deleted it after it was queued, or
    /// has already reached a terminal status.
    pub async fn run_job(&self, job: &ScriptJob) -> CoreResult<Option<RunOutcome>> {
        let Some(mut execution) = self.store.get_execution(job.execution_id).await? else {
            tracing::warn!(
                execution_id = job.execution_id,
                task_id = %job.job_id,
                "Execution no longer exists, skipping job",
            );
            return Ok(None);
        };
        if execution.status.is_terminal() {
            tracing::warn!(
                execution_id = job.execution_id,
                task_id = %job.job_id,
                status = %execution.status,
                "Execution already finished, skipping redelivered job",
            );
            return Ok(None);
        }
        let timeout = job.timeout_secs.map(Duration::from_secs);
        let outcome = self
            .execute(&job.data, &job.actor, &mut execution, job.commit, timeout)
            .await?;
        Ok(Some(outcome))
    }

    /// Run `execution` with `data` on behalf of `actor`, using the script's
    /// declared timeout.
    ///
    /// Script failures are absorbed into the execution's status and log;
    /// only failures to start, resolve or persist the execution are
    /// returned as errors.
    pub async fn run_script(
        &self,
        data: &Value,
        actor: &Actor,
        execution: &mut ScriptExecution,
        commit: bool,
    ) -> CoreResult<RunOutcome> {
        self.execute(data, actor, execution, commit, None).await
    }

    async fn execute(
        &self,
        data: &Value,
        actor: &Actor,
        execution: &mut ScriptExecution,
        commit: bool,
        timeout: Option<Duration>,
    ) -> CoreResult<RunOutcome> {
        // A finished execution must never run its script again.
        if execution.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: execution.status,
                to: ExecutionStatus::Running,
            });
        }
        execution.start()?;
        self.store.save_execution(execution).await?;

        let instance = self
            .store
            .get_instance(execution.script_instance_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "script instance",
                id: execution.script_instance_id,
            })?;
        let definition = self
            .registry
            .load(&instance.module_path, &instance.class_name)
            .await?;
        let timeout = timeout.or(definition.metadata.job_timeout.map(Duration::from_secs));

        let mut ctx = ScriptContext::new(Arc::clone(&self.sink));
        ctx.bind_as(execution, actor);

        tracing::info!(
            execution_id = execution.id,
            script = %definition.path(),
            commit,
            "Running script",
        );

        let tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                note(&ctx, LogLevel::Failure, format!("Could not open a transaction: {e}")).await;
                execution.terminate(ExecutionStatus::Errored)?;
                self.store.save_execution(execution).await?;
                return Err(e);
            }
        };
        ctx.attach_transaction(tx);

        let outcome = {
            let script = definition.instantiate();
            let run = script.run(&mut ctx, data, commit);
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => result.into(),
                    Err(_elapsed) => Outcome::TimedOut(limit),
                },
                None => run.await.into(),
            }
        };
        let tx = ctx.take_transaction();

        let status = match outcome {
            Outcome::Returned(value) if commit => match commit_tx(tx).await {
                Ok(()) => {
                    if let Err(e) = self.changes.flush(execution.request_id).await {
                        tracing::error!(execution_id = execution.id, error = %e, "Failed to flush change records");
                    }
                    execution.data.output = stringify(value);
                    ExecutionStatus::Completed
                }
                Err(e) => {
                    let failure = ScriptFailure::from(e);
                    note(&ctx, LogLevel::Failure, failure_line(&failure)).await;
                    note(&ctx, LogLevel::Info, REVERTED_ON_ERROR).await;
                    self.changes.discard(execution.request_id).await;
                    ExecutionStatus::Errored
                }
            },
            Outcome::Returned(value) => {
                rollback_tx(tx).await;
                note(&ctx, LogLevel::Info, REVERTED_DRY_RUN).await;
                self.changes.discard(execution.request_id).await;
                execution.data.output = stringify(value);
                ExecutionStatus::Completed
            }
            Outcome::Failed(failure) => {
                rollback_tx(tx).await;
                tracing::error!(execution_id = execution.id, error = %failure, "Script failed");
                note(&ctx, LogLevel::Failure, failure_line(&failure)).await;
                note(&ctx, LogLevel::Info, REVERTED_ON_ERROR).await;
                self.changes.discard(execution.request_id).await;
                ExecutionStatus::Errored
            }
            Outcome::TimedOut(limit) => {
                rollback_tx(tx).await;
                tracing::error!(execution_id = execution.id, timeout_secs = limit.as_secs(), "Script timed out");
                note(
                    &ctx,
                    LogLevel::Failure,
                    format!("Script timed out after {}s", limit.as_secs()),
                )
                .await;
                note(&ctx, LogLevel::Info, REVERTED_ON_ERROR).await;
                self.changes.discard(execution.request_id).await;
                ExecutionStatus::Failed
            }
        };

        execution.terminate(status)?;
        self.store.save_execution(execution).await?;
        tracing::info!(
            execution_id = execution.id,
            %status,
            duration = %execution.duration_display(chrono::Utc::now()),
            "Script finished",
        );

        let next_execution = match execution.next_recurrence()? {
            None => None,
            Some(new) => {
                let next = self.store.create_execution(&new).await?;
                let at = next.scheduled_at.ok_or(CoreError::RecurrenceWithoutSchedule {
                    execution_id: next.id,
                })?;
                let job = ScriptJob::for_execution(&next, commit, timeout.map(|t| t.as_secs()));
                self.queue.enqueue_at(at, job).await?;
                tracing::info!(
                    execution_id = execution.id,
                    next_execution_id = next.id,
                    scheduled_at = %at,
                    "Scheduled next run",
                );
                Some(next)
            }
        };

        Ok(RunOutcome {
            status,
            next_execution,
        })
    }
}

impl From<Result<Value, ScriptFailure>> for Outcome {
    fn from(result: Result<Value, ScriptFailure>) -> Self {
        match result {
            Ok(value) => Self::Returned(value),
            Err(failure) => Self::Failed(failure),
        }
    }
}

/// Failure log line of a script failure.
pub fn failure_line(failure: &ScriptFailure) -> String {
    match failure {
        ScriptFailure::Abort(message) => format!("Script aborted with error: {message}"),
        ScriptFailure::Error {
            kind,
            message,
            trace,
        } => format!("An exception occurred: `{kind}: {message}`\n```\n{trace}\n```"),
    }
}

/// Stored form of a script's return value.
fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Write an engine log line; storage errors are reported, not raised.
async fn note(ctx: &ScriptContext, level: LogLevel, message: impl std::fmt::Display) {
    if let Err(e) = ctx.log(level, message).await {
        tracing::error!(error = %e, "Failed to write script log line");
    }
}

async fn commit_tx(tx: Option<Box<dyn Transaction>>) -> CoreResult<()> {
    match tx {
        Some(tx) => tx.commit().await,
        None => Ok(()),
    }
}

async fn rollback_tx(tx: Option<Box<dyn Transaction>>) {
    if let Some(tx) = tx {
        if let Err(e) = tx.rollback().await {
            tracing::error!(error = %e, "Rollback failed");
        }
    }
}
