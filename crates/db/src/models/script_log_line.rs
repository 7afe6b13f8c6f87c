//! `script_log_lines` rows.

use scriptmgr_core::error::CoreError;
use scriptmgr_core::models::ScriptLogLine;
use scriptmgr_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `script_log_lines` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScriptLogLineRow {
    pub id: DbId,
    pub script_execution_id: DbId,
    pub level: String,
    pub message: String,
    pub timestamp: Timestamp,
}

impl TryFrom<ScriptLogLineRow> for ScriptLogLine {
    type Error = CoreError;

    fn try_from(row: ScriptLogLineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            script_execution_id: row.script_execution_id,
            level: row.level.parse()?,
            message: row.message,
            timestamp: row.timestamp,
        })
    }
}
