//! Storage seams of the engine.
//!
//! The engine never talks to a database directly. Persistent state goes
//! through [`ScriptStore`], log lines and artifacts through [`LogSink`]
//! (backed by a separate connection so they survive a rollback), and the
//! script's own writes through a [`Transaction`].

use std::any::Any;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::execution::{NewScriptExecution, ScriptExecution};
use crate::models::{
    NewScriptArtifact, NewScriptInstance, ScriptArtifact, ScriptInstance, ScriptLogLine,
};
use crate::status::LogLevel;
use crate::types::DbId;

/// Unit of work a script runs inside.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it
/// back.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;

    /// Concrete handle for scripts that know their backend.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Instances and executions.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Open the transaction a script runs inside.
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>>;

    // ---- Instances ----

    async fn create_instance(&self, new: &NewScriptInstance) -> CoreResult<ScriptInstance>;

    async fn get_instance(&self, id: DbId) -> CoreResult<Option<ScriptInstance>>;

    async fn find_instance(
        &self,
        module_path: &str,
        class_name: &str,
    ) -> CoreResult<Option<ScriptInstance>>;

    /// All instances ordered by group, weight and name.
    async fn list_instances(&self) -> CoreResult<Vec<ScriptInstance>>;

    /// Delete an instance together with its executions, log lines and
    /// artifacts. Returns `false` if it did not exist.
    async fn delete_instance(&self, id: DbId) -> CoreResult<bool>;

    // ---- Executions ----

    async fn create_execution(&self, new: &NewScriptExecution) -> CoreResult<ScriptExecution>;

    async fn get_execution(&self, id: DbId) -> CoreResult<Option<ScriptExecution>>;

    /// Persist status, timestamps and payload of an existing execution.
    async fn save_execution(&self, execution: &ScriptExecution) -> CoreResult<()>;

    async fn delete_execution(&self, id: DbId) -> CoreResult<bool>;

    /// Executions of one instance, newest first.
    async fn list_executions(&self, instance_id: DbId) -> CoreResult<Vec<ScriptExecution>>;
}

/// Append-only log lines and artifacts of a run.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Write one line; the timestamp is assigned at write time.
    async fn append_log(
        &self,
        execution_id: DbId,
        level: LogLevel,
        message: &str,
    ) -> CoreResult<ScriptLogLine>;

    async fn save_artifact(&self, new: &NewScriptArtifact) -> CoreResult<ScriptArtifact>;

    /// Lines of one execution ordered by timestamp, then id.
    async fn list_logs(&self, execution_id: DbId) -> CoreResult<Vec<ScriptLogLine>>;

    async fn list_artifacts(&self, execution_id: DbId) -> CoreResult<Vec<ScriptArtifact>>;
}

/// Object-change records correlated by an execution's request id.
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// Persist pending records after a committed, successful run.
    async fn flush(&self, request_id: Uuid) -> CoreResult<()>;

    /// Drop pending records after a dry run or a failure.
    async fn discard(&self, request_id: Uuid);
}

/// Change tracker for deployments without change logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChangeTracker;

#[async_trait]
impl ChangeTracker for NoopChangeTracker {
    async fn flush(&self, _request_id: Uuid) -> CoreResult<()> {
        Ok(())
    }

    async fn discard(&self, _request_id: Uuid) {}
}
