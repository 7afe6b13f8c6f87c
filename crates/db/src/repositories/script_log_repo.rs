//! Repository for the `script_log_lines` table.

use scriptmgr_core::status::LogLevel;
use scriptmgr_core::types::DbId;
use sqlx::PgPool;

use crate::models::script_log_line::ScriptLogLineRow;

const COLUMNS: &str = "id, script_execution_id, level, message, timestamp";

pub struct ScriptLogRepo;

impl ScriptLogRepo {
    /// Append a line stamped with the database clock.
    pub async fn append(
        pool: &PgPool,
        execution_id: DbId,
        level: LogLevel,
        message: &str,
    ) -> Result<ScriptLogLineRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO script_log_lines (script_execution_id, level, message) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptLogLineRow>(&query)
            .bind(execution_id)
            .bind(level.as_str())
            .bind(message)
            .fetch_one(pool)
            .await
    }

    pub async fn list_for_execution(
        pool: &PgPool,
        execution_id: DbId,
    ) -> Result<Vec<ScriptLogLineRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM script_log_lines \
             WHERE script_execution_id = $1 \
             ORDER BY timestamp, id"
        );
        sqlx::query_as::<_, ScriptLogLineRow>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }
}
