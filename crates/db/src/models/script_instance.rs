//! `script_instances` rows.

use scriptmgr_core::error::CoreError;
use scriptmgr_core::models::ScriptInstance;
use scriptmgr_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `script_instances` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScriptInstanceRow {
    pub id: DbId,
    pub name: String,
    pub module_path: String,
    pub class_name: String,
    pub script_group: Option<String>,
    pub weight: i32,
    pub description: Option<String>,
    pub task_queues: Vec<String>,
    pub tenant_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ScriptInstanceRow> for ScriptInstance {
    type Error = CoreError;

    fn try_from(row: ScriptInstanceRow) -> Result<Self, Self::Error> {
        let weight = u16::try_from(row.weight).map_err(|_| {
            CoreError::Internal(format!("script instance {} has weight {}", row.id, row.weight))
        })?;
        Ok(Self {
            id: row.id,
            name: row.name,
            module_path: row.module_path,
            class_name: row.class_name,
            group: row.script_group,
            weight,
            description: row.description,
            task_queues: row.task_queues,
            tenant_id: row.tenant_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
