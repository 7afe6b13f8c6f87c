//! Contract with the background task queue.
//!
//! The engine only needs at-least-once immediate or delayed dispatch with a
//! stable handle. The handle of a job is always the `task_id` of the
//! execution it runs.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::execution::ScriptExecution;
use crate::types::{Actor, DbId, Timestamp};

/// External handle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub Uuid);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&ScriptExecution> for JobHandle {
    fn from(execution: &ScriptExecution) -> Self {
        Self(execution.task_id)
    }
}

/// Payload handed to the queue; everything a worker needs to call
/// `run_script`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptJob {
    /// Equal to the execution's `task_id`.
    pub job_id: Uuid,
    /// Cleaned script parameters.
    pub data: Value,
    pub actor: Actor,
    pub commit: bool,
    pub execution_id: DbId,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ScriptJob {
    /// Job that runs `execution` with its stored input.
    pub fn for_execution(execution: &ScriptExecution, commit: bool, timeout_secs: Option<u64>) -> Self {
        Self {
            job_id: execution.task_id,
            data: execution.data.input.clone(),
            actor: execution.actor.clone(),
            commit,
            execution_id: execution.id,
            queue: execution.task_queue.clone(),
            interval: execution.interval,
            timeout_secs,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle(self.job_id)
    }
}

#[async_trait]
pub trait QueueAdapter: Send + Sync {
    async fn enqueue_now(&self, job: ScriptJob) -> CoreResult<JobHandle>;

    async fn enqueue_at(&self, at: Timestamp, job: ScriptJob) -> CoreResult<JobHandle>;

    /// Cancel a job that has not started. Returns `false` if it was
    /// unknown or already picked up.
    async fn cancel(&self, handle: JobHandle) -> CoreResult<bool>;

    /// Look up a job that is still known to the queue.
    async fn fetch(&self, handle: JobHandle) -> CoreResult<Option<JobHandle>>;
}
