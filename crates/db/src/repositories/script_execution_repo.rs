//! Repository for the `script_executions` table.

use scriptmgr_core::execution::{NewScriptExecution, ScriptExecution};
use scriptmgr_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::script_execution::ScriptExecutionRow;

/// Column list for `script_executions` queries.
const COLUMNS: &str = "\
    id, script_instance_id, user_id, user_name, created_at, scheduled_at, \
    started_at, completed_at, status, interval_minutes, task_id, request_id, \
    data, task_queue";

pub struct ScriptExecutionRepo;

impl ScriptExecutionRepo {
    pub async fn create(
        pool: &PgPool,
        input: &NewScriptExecution,
    ) -> Result<ScriptExecutionRow, sqlx::Error> {
        let interval = input
            .interval
            .map(i32::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let query = format!(
            "INSERT INTO script_executions \
                (script_instance_id, user_id, user_name, scheduled_at, status, \
                 interval_minutes, task_id, request_id, data, task_queue) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptExecutionRow>(&query)
            .bind(input.script_instance_id)
            .bind(input.actor.user_id)
            .bind(&input.actor.name)
            .bind(input.scheduled_at)
            .bind(input.status.as_str())
            .bind(interval)
            .bind(input.task_id)
            .bind(input.request_id)
            .bind(Json(&input.data))
            .bind(&input.task_queue)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ScriptExecutionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM script_executions WHERE id = $1");
        sqlx::query_as::<_, ScriptExecutionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Write back the mutable state of an execution. Returns `false` if the
    /// row no longer exists.
    pub async fn update_state(pool: &PgPool, execution: &ScriptExecution) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE script_executions \
             SET status = $2, started_at = $3, completed_at = $4, data = $5 \
             WHERE id = $1",
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(Json(&execution.data))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM script_executions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Executions of one instance, newest first.
    pub async fn list_for_instance(
        pool: &PgPool,
        instance_id: DbId,
    ) -> Result<Vec<ScriptExecutionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM script_executions \
             WHERE script_instance_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, ScriptExecutionRow>(&query)
            .bind(instance_id)
            .fetch_all(pool)
            .await
    }
}
