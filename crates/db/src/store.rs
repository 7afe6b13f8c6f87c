//! PostgreSQL implementations of the engine's storage seams.
//!
//! [`PgLogSink`] should be built on its own pool: log lines and artifacts
//! are written with autocommit and must never share a connection with the
//! script's [`PgTransaction`].

use std::any::Any;

use async_trait::async_trait;
use scriptmgr_core::error::{CoreError, CoreResult};
use scriptmgr_core::execution::{NewScriptExecution, ScriptExecution};
use scriptmgr_core::models::{
    NewScriptArtifact, NewScriptInstance, ScriptArtifact, ScriptInstance, ScriptLogLine,
};
use scriptmgr_core::status::LogLevel;
use scriptmgr_core::store::{LogSink, ScriptStore, Transaction};
use scriptmgr_core::types::DbId;
use sqlx::{PgConnection, PgPool, Postgres};
use validator::Validate;

use crate::repositories::script_instance_repo::PATH_CONSTRAINT;
use crate::repositories::{
    ScriptArtifactRepo, ScriptExecutionRepo, ScriptInstanceRepo, ScriptLogRepo,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn db_error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn violates(err: &sqlx::Error, code: &str, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(code) && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// PgTransaction
// ---------------------------------------------------------------------------

/// The transaction a script runs inside.
///
/// Scripts reach the connection through
/// `ctx.transaction_mut::<PgTransaction>()`.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.inner
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.inner.commit().await.map_err(CoreError::storage)
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.inner.rollback().await.map_err(CoreError::storage)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// PgScriptStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgScriptStore {
    pool: PgPool,
}

impl PgScriptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ScriptStore for PgScriptStore {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>> {
        let inner = self.pool.begin().await.map_err(CoreError::storage)?;
        Ok(Box::new(PgTransaction { inner }))
    }

    async fn create_instance(&self, new: &NewScriptInstance) -> CoreResult<ScriptInstance> {
        new.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        match ScriptInstanceRepo::create(&self.pool, new).await {
            Ok(row) => row.try_into(),
            Err(e) if violates(&e, UNIQUE_VIOLATION, PATH_CONSTRAINT) => Err(CoreError::Validation(
                "Script instance with this Module path and Class name already exists.".into(),
            )),
            Err(e) => Err(CoreError::storage(e)),
        }
    }

    async fn get_instance(&self, id: DbId) -> CoreResult<Option<ScriptInstance>> {
        ScriptInstanceRepo::find_by_id(&self.pool, id)
            .await
            .map_err(CoreError::storage)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_instance(
        &self,
        module_path: &str,
        class_name: &str,
    ) -> CoreResult<Option<ScriptInstance>> {
        ScriptInstanceRepo::find_by_path(&self.pool, module_path, class_name)
            .await
            .map_err(CoreError::storage)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_instances(&self) -> CoreResult<Vec<ScriptInstance>> {
        ScriptInstanceRepo::list(&self.pool)
            .await
            .map_err(CoreError::storage)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn delete_instance(&self, id: DbId) -> CoreResult<bool> {
        ScriptInstanceRepo::delete(&self.pool, id)
            .await
            .map_err(CoreError::storage)
    }

    async fn create_execution(&self, new: &NewScriptExecution) -> CoreResult<ScriptExecution> {
        new.check()?;
        match ScriptExecutionRepo::create(&self.pool, new).await {
            Ok(row) => row.try_into(),
            Err(e) if db_error_code(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(CoreError::NotFound {
                    entity: "script instance",
                    id: new.script_instance_id,
                })
            }
            Err(e) if db_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) => Err(
                CoreError::Validation("Execution task_id and request_id must be unique".into()),
            ),
            Err(e) => Err(CoreError::storage(e)),
        }
    }

    async fn get_execution(&self, id: DbId) -> CoreResult<Option<ScriptExecution>> {
        ScriptExecutionRepo::find_by_id(&self.pool, id)
            .await
            .map_err(CoreError::storage)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn save_execution(&self, execution: &ScriptExecution) -> CoreResult<()> {
        let updated = ScriptExecutionRepo::update_state(&self.pool, execution)
            .await
            .map_err(CoreError::storage)?;
        if !updated {
            return Err(CoreError::NotFound {
                entity: "script execution",
                id: execution.id,
            });
        }
        Ok(())
    }

    async fn delete_execution(&self, id: DbId) -> CoreResult<bool> {
        ScriptExecutionRepo::delete(&self.pool, id)
            .await
            .map_err(CoreError::storage)
    }

    async fn list_executions(&self, instance_id: DbId) -> CoreResult<Vec<ScriptExecution>> {
        ScriptExecutionRepo::list_for_instance(&self.pool, instance_id)
            .await
            .map_err(CoreError::storage)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PgLogSink
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgLogSink {
    pool: PgPool,
}

impl PgLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogSink for PgLogSink {
    async fn append_log(
        &self,
        execution_id: DbId,
        level: LogLevel,
        message: &str,
    ) -> CoreResult<ScriptLogLine> {
        ScriptLogRepo::append(&self.pool, execution_id, level, message)
            .await
            .map_err(CoreError::storage)?
            .try_into()
    }

    async fn save_artifact(&self, new: &NewScriptArtifact) -> CoreResult<ScriptArtifact> {
        ScriptArtifactRepo::create(&self.pool, new)
            .await
            .map(Into::into)
            .map_err(CoreError::storage)
    }

    async fn list_logs(&self, execution_id: DbId) -> CoreResult<Vec<ScriptLogLine>> {
        ScriptLogRepo::list_for_execution(&self.pool, execution_id)
            .await
            .map_err(CoreError::storage)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn list_artifacts(&self, execution_id: DbId) -> CoreResult<Vec<ScriptArtifact>> {
        Ok(ScriptArtifactRepo::list_for_execution(&self.pool, execution_id)
            .await
            .map_err(CoreError::storage)?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}
