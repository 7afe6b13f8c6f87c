//! `script_artifacts` rows.

use scriptmgr_core::models::ScriptArtifact;
use scriptmgr_core::types::DbId;
use sqlx::FromRow;

/// A row from the `script_artifacts` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScriptArtifactRow {
    pub id: DbId,
    pub script_execution_id: DbId,
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl From<ScriptArtifactRow> for ScriptArtifact {
    fn from(row: ScriptArtifactRow) -> Self {
        Self {
            id: row.id,
            script_execution_id: row.script_execution_id,
            name: row.name,
            content_type: row.content_type,
            data: row.data,
        }
    }
}
