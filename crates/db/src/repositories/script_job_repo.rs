//! Repository for the `script_jobs` table.
//!
//! A job is claimed exactly once: [`ScriptJobRepo::claim_next`] uses
//! `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never pick the
//! same row.

use scriptmgr_core::queue::ScriptJob;
use scriptmgr_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::script_job::ScriptJobRow;

/// Column list for `script_jobs` queries.
const COLUMNS: &str = "\
    id, queue, payload, run_at, claimed_at, claimed_by, completed_at, error, created_at";

pub struct ScriptJobRepo;

impl ScriptJobRepo {
    /// Insert a job due at `run_at`, or now when `None`.
    pub async fn enqueue(
        pool: &PgPool,
        job: &ScriptJob,
        run_at: Option<Timestamp>,
    ) -> Result<ScriptJobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO script_jobs (id, queue, payload, run_at) \
             VALUES ($1, $2, $3, COALESCE($4, NOW())) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptJobRow>(&query)
            .bind(job.job_id)
            .bind(&job.queue)
            .bind(Json(job))
            .bind(run_at)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest due job on one of `queues`.
    pub async fn claim_next(
        pool: &PgPool,
        queues: &[String],
        worker: &str,
    ) -> Result<Option<ScriptJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE script_jobs \
             SET claimed_at = NOW(), claimed_by = $2 \
             WHERE id = ( \
                 SELECT id FROM script_jobs \
                 WHERE claimed_at IS NULL AND queue = ANY($1) AND run_at <= NOW() \
                 ORDER BY run_at, created_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptJobRow>(&query)
            .bind(queues)
            .bind(worker)
            .fetch_optional(pool)
            .await
    }

    /// Mark a claimed job as done, recording the error if it failed.
    pub async fn finish(pool: &PgPool, id: Uuid, error: Option<&str>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE script_jobs SET completed_at = NOW(), error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Delete a job that no worker has claimed yet.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM script_jobs WHERE id = $1 AND claimed_at IS NULL")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ScriptJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM script_jobs WHERE id = $1");
        sqlx::query_as::<_, ScriptJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Purge finished jobs completed before `cutoff`.
    pub async fn delete_completed_before(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM script_jobs WHERE completed_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
