//! `script_jobs` rows.

use scriptmgr_core::queue::ScriptJob;
use scriptmgr_core::types::Timestamp;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `script_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScriptJobRow {
    /// The execution's `task_id`.
    pub id: Uuid,
    pub queue: String,
    pub payload: Json<ScriptJob>,
    pub run_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub claimed_by: Option<String>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

impl ScriptJobRow {
    pub fn into_job(self) -> ScriptJob {
        self.payload.0
    }
}
