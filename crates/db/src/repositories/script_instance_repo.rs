//! Repository for the `script_instances` table.

use scriptmgr_core::models::NewScriptInstance;
use scriptmgr_core::types::DbId;
use sqlx::PgPool;

use crate::models::script_instance::ScriptInstanceRow;

/// Column list for `script_instances` queries.
const COLUMNS: &str = "\
    id, name, module_path, class_name, script_group, weight, description, \
    task_queues, tenant_id, created_at, updated_at";

/// Unique constraint on `(module_path, class_name)`.
pub const PATH_CONSTRAINT: &str = "uq_script_instances_path";

pub struct ScriptInstanceRepo;

impl ScriptInstanceRepo {
    pub async fn create(
        pool: &PgPool,
        input: &NewScriptInstance,
    ) -> Result<ScriptInstanceRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO script_instances \
                (name, module_path, class_name, script_group, weight, description, task_queues, tenant_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptInstanceRow>(&query)
            .bind(&input.name)
            .bind(&input.module_path)
            .bind(&input.class_name)
            .bind(&input.group)
            .bind(i32::from(input.weight))
            .bind(&input.description)
            .bind(&input.task_queues)
            .bind(input.tenant_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ScriptInstanceRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM script_instances WHERE id = $1");
        sqlx::query_as::<_, ScriptInstanceRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_path(
        pool: &PgPool,
        module_path: &str,
        class_name: &str,
    ) -> Result<Option<ScriptInstanceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM script_instances WHERE module_path = $1 AND class_name = $2"
        );
        sqlx::query_as::<_, ScriptInstanceRow>(&query)
            .bind(module_path)
            .bind(class_name)
            .fetch_optional(pool)
            .await
    }

    /// All instances ordered by group, weight and name.
    pub async fn list(pool: &PgPool) -> Result<Vec<ScriptInstanceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM script_instances \
             ORDER BY script_group NULLS FIRST, weight, name"
        );
        sqlx::query_as::<_, ScriptInstanceRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// Delete an instance; executions, log lines and artifacts cascade.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM script_instances WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
