//! Repository for the `script_artifacts` table.

use scriptmgr_core::models::NewScriptArtifact;
use scriptmgr_core::types::DbId;
use sqlx::PgPool;

use crate::models::script_artifact::ScriptArtifactRow;

const COLUMNS: &str = "id, script_execution_id, name, content_type, data";

pub struct ScriptArtifactRepo;

impl ScriptArtifactRepo {
    pub async fn create(
        pool: &PgPool,
        input: &NewScriptArtifact,
    ) -> Result<ScriptArtifactRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO script_artifacts (script_execution_id, name, content_type, data) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptArtifactRow>(&query)
            .bind(input.script_execution_id)
            .bind(&input.name)
            .bind(&input.content_type)
            .bind(&input.data)
            .fetch_one(pool)
            .await
    }

    pub async fn list_for_execution(
        pool: &PgPool,
        execution_id: DbId,
    ) -> Result<Vec<ScriptArtifactRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM script_artifacts WHERE script_execution_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, ScriptArtifactRow>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }
}
