//! `script_executions` rows.

use scriptmgr_core::error::CoreError;
use scriptmgr_core::execution::{ExecutionPayload, ScriptExecution};
use scriptmgr_core::types::{Actor, DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `script_executions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScriptExecutionRow {
    pub id: DbId,
    pub script_instance_id: DbId,
    pub user_id: Option<DbId>,
    pub user_name: String,
    pub created_at: Timestamp,
    pub scheduled_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub status: String,
    pub interval_minutes: Option<i32>,
    pub task_id: Uuid,
    pub request_id: Uuid,
    pub data: Json<ExecutionPayload>,
    pub task_queue: String,
}

impl TryFrom<ScriptExecutionRow> for ScriptExecution {
    type Error = CoreError;

    fn try_from(row: ScriptExecutionRow) -> Result<Self, Self::Error> {
        let interval = row
            .interval_minutes
            .map(|m| {
                u32::try_from(m).map_err(|_| {
                    CoreError::Internal(format!("execution {} has interval {m}", row.id))
                })
            })
            .transpose()?;
        Ok(Self {
            id: row.id,
            script_instance_id: row.script_instance_id,
            actor: Actor::new(row.user_id, row.user_name),
            created_at: row.created_at,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: row.status.parse()?,
            interval,
            task_id: row.task_id,
            request_id: row.request_id,
            data: row.data.0,
            task_queue: row.task_queue,
        })
    }
}
