use crate::registry::LoadError;
use crate::status::ExecutionStatus;
use crate::types::DbId;

/// Boxed backend error carried by [`CoreError::Storage`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Invalid status for job termination: {0}. Choices are: completed, errored, failed")]
    InvalidTerminalStatus(ExecutionStatus),

    #[error("Script execution not set")]
    NoExecutionBound,

    #[error("Execution {execution_id} has an interval but no scheduled time")]
    RecurrenceWithoutSchedule { execution_id: DbId },

    #[error("Failed to load module {module}: {source}")]
    ModuleLoad {
        module: String,
        #[source]
        source: LoadError,
    },

    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Sync failed: {0}")]
    Sync(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap a backend error (sqlx, I/O, ...) as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(Box::new(err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
