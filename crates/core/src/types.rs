use serde::{Deserialize, Serialize};

/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The opaque identity on whose behalf an operation runs.
///
/// The core never interprets it beyond recording it on executions and
/// forwarding it to queued jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<DbId>,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: Option<DbId>, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }

    /// Actor used for runs started by the system itself (e.g. recurrences
    /// whose original actor has been removed).
    pub fn system() -> Self {
        Self::new(None, "system")
    }
}
