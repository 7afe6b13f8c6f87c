//! Job queue backed by the `script_jobs` table.

use async_trait::async_trait;
use scriptmgr_core::error::{CoreError, CoreResult};
use scriptmgr_core::queue::{JobHandle, QueueAdapter, ScriptJob};
use scriptmgr_core::types::Timestamp;
use sqlx::PgPool;

use crate::repositories::ScriptJobRepo;

fn queue_error(err: sqlx::Error) -> CoreError {
    CoreError::Queue(err.to_string())
}

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim the next due job on one of `queues` for `worker`.
    pub async fn claim_next(&self, queues: &[String], worker: &str) -> CoreResult<Option<ScriptJob>> {
        Ok(ScriptJobRepo::claim_next(&self.pool, queues, worker)
            .await
            .map_err(queue_error)?
            .map(|row| row.into_job()))
    }

    /// Record that a claimed job has finished.
    pub async fn finish(&self, handle: JobHandle, error: Option<&str>) -> CoreResult<()> {
        ScriptJobRepo::finish(&self.pool, handle.0, error)
            .await
            .map_err(queue_error)
    }

    /// Drop finished jobs completed before `cutoff`.
    pub async fn purge_finished(&self, cutoff: Timestamp) -> CoreResult<u64> {
        ScriptJobRepo::delete_completed_before(&self.pool, cutoff)
            .await
            .map_err(queue_error)
    }
}

#[async_trait]
impl QueueAdapter for PgQueue {
    async fn enqueue_now(&self, job: ScriptJob) -> CoreResult<JobHandle> {
        let row = ScriptJobRepo::enqueue(&self.pool, &job, None)
            .await
            .map_err(queue_error)?;
        tracing::debug!(task_id = %row.id, queue = %row.queue, "Job enqueued");
        Ok(JobHandle(row.id))
    }

    async fn enqueue_at(&self, at: Timestamp, job: ScriptJob) -> CoreResult<JobHandle> {
        let row = ScriptJobRepo::enqueue(&self.pool, &job, Some(at))
            .await
            .map_err(queue_error)?;
        tracing::debug!(task_id = %row.id, queue = %row.queue, run_at = %row.run_at, "Job scheduled");
        Ok(JobHandle(row.id))
    }

    async fn cancel(&self, handle: JobHandle) -> CoreResult<bool> {
        ScriptJobRepo::cancel(&self.pool, handle.0)
            .await
            .map_err(queue_error)
    }

    async fn fetch(&self, handle: JobHandle) -> CoreResult<Option<JobHandle>> {
        let row = ScriptJobRepo::find_by_id(&self.pool, handle.0)
            .await
            .map_err(queue_error)?;
        Ok(row
            .filter(|r| r.completed_at.is_none())
            .map(|r| JobHandle(r.id)))
    }
}
