//! Records owned by the engine besides executions: registered script
//! instances, log lines and artifacts.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::registry::ScriptDefinition;
use crate::status::LogLevel;
use crate::types::{DbId, Timestamp};

/// Default sort weight of scripts and instances.
pub const DEFAULT_WEIGHT: u16 = 1000;

// ---------------------------------------------------------------------------
// Script instances
// ---------------------------------------------------------------------------

/// An administrator-registered binding to a discovered script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptInstance {
    pub id: DbId,
    pub name: String,
    pub module_path: String,
    pub class_name: String,
    pub group: Option<String>,
    pub weight: u16,
    pub description: Option<String>,
    /// Queues an operator may pick from. Empty means the default queue.
    pub task_queues: Vec<String>,
    pub tenant_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ScriptInstance {
    /// Registry key, `module_path.class_name`.
    pub fn script_path(&self) -> String {
        format!("{}.{}", self.module_path, self.class_name)
    }
}

/// DTO for registering a script instance.
#[derive(Debug, Clone, PartialEq, Validate, Deserialize)]
pub struct NewScriptInstance {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 1000))]
    pub module_path: String,
    #[validate(length(min = 1, max = 1000))]
    pub class_name: String,
    #[validate(length(max = 100))]
    pub group: Option<String>,
    pub weight: u16,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub task_queues: Vec<String>,
    pub tenant_id: Option<DbId>,
}

impl NewScriptInstance {
    /// Instance registration copied from a discovered definition.
    pub fn from_definition(definition: &ScriptDefinition) -> Self {
        let meta = &definition.metadata;
        Self {
            name: meta.name.clone(),
            module_path: definition.module_path.clone(),
            class_name: definition.class_name.clone(),
            group: meta.group.clone(),
            weight: meta.weight,
            description: Some(meta.description.clone()).filter(|d| !d.is_empty()),
            task_queues: meta.task_queues.clone(),
            tenant_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Log lines
// ---------------------------------------------------------------------------

/// One structured log entry emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLogLine {
    pub id: DbId,
    pub script_execution_id: DbId,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A named binary blob produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptArtifact {
    pub id: DbId,
    pub script_execution_id: DbId,
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// DTO for saving an artifact.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct NewScriptArtifact {
    pub script_execution_id: DbId,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub content_type: String,
    pub data: Vec<u8>,
}
