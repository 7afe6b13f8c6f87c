//! Operator-facing operations around the engine: submitting runs, loading
//! discovered scripts as instances, and deleting records together with
//! their queued jobs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::ScriptManagerConfig;
use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::execution::{NewScriptExecution, ScriptExecution};
use crate::form::{FormSpec, FIELD_COMMIT, FIELD_INTERVAL, FIELD_SCHEDULE_AT, FIELD_TASK_QUEUE};
use crate::models::{NewScriptInstance, ScriptArtifact, ScriptInstance, ScriptLogLine};
use crate::queue::{JobHandle, QueueAdapter, ScriptJob};
use crate::registry::{LoadError, Registry};
use crate::store::{LogSink, ScriptStore};
use crate::types::{Actor, DbId, Timestamp};

/// Submitted fields that are never stored as script input.
pub const EXCLUDED_INPUT_FIELDS: [&str; 6] = [
    "csrfmiddlewaretoken",
    FIELD_SCHEDULE_AT,
    FIELD_INTERVAL,
    "_run",
    FIELD_COMMIT,
    FIELD_TASK_QUEUE,
];

/// A request to run a script instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitRequest {
    /// Script parameters as submitted.
    pub data: Map<String, Value>,
    pub commit: bool,
    pub schedule_at: Option<Timestamp>,
    /// Recurrence interval in minutes.
    pub interval: Option<u32>,
    pub task_queue: Option<String>,
}

impl SubmitRequest {
    /// Build a request from flat form input, reading the execution
    /// parameters out of their `_`-prefixed fields.
    pub fn from_form(data: Map<String, Value>) -> CoreResult<Self> {
        let text = |field: &str| match data.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let commit = match data.get(FIELD_COMMIT) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "on" | "true" | "1" | "yes"),
            _ => false,
        };
        let schedule_at = text(FIELD_SCHEDULE_AT)
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| CoreError::Validation(format!("Enter a valid date/time: {raw}")))
            })
            .transpose()?;
        let interval = text(FIELD_INTERVAL)
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| CoreError::Validation(format!("Enter a whole number: {raw}")))
            })
            .transpose()?;
        let task_queue = text(FIELD_TASK_QUEUE);

        Ok(Self {
            data,
            commit,
            schedule_at,
            interval,
            task_queue,
        })
    }
}

/// Outcome of [`ScriptManager::load_scripts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Paths of the newly created instances.
    pub loaded: Vec<String>,
    /// Modules (or script paths) that could not be loaded.
    pub failed: BTreeMap<String, LoadError>,
}

pub struct ScriptManager {
    store: Arc<dyn ScriptStore>,
    sink: Arc<dyn LogSink>,
    queue: Arc<dyn QueueAdapter>,
    registry: Arc<Registry>,
    default_queue: String,
}

impl ScriptManager {
    pub fn new(engine: &Engine, config: &ScriptManagerConfig) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            sink: Arc::clone(engine.sink()),
            queue: Arc::clone(engine.queue()),
            registry: Arc::clone(engine.registry()),
            default_queue: config.default_queue.clone(),
        }
    }

    /// Queues an operator may choose for `instance`.
    pub fn task_queues(&self, instance: &ScriptInstance) -> Vec<String> {
        if instance.task_queues.is_empty() {
            vec![self.default_queue.clone()]
        } else {
            instance.task_queues.clone()
        }
    }

    async fn instance(&self, id: DbId) -> CoreResult<ScriptInstance> {
        self.store.get_instance(id).await?.ok_or(CoreError::NotFound {
            entity: "script instance",
            id,
        })
    }

    // ---- Runs ----

    /// Validate a run request, record the execution and hand it to the
    /// queue.
    pub async fn submit(
        &self,
        instance_id: DbId,
        actor: &Actor,
        request: SubmitRequest,
    ) -> CoreResult<ScriptExecution> {
        let instance = self.instance(instance_id).await?;
        let definition = self
            .registry
            .load(&instance.module_path, &instance.class_name)
            .await?;

        let mut input = request.data;
        for field in EXCLUDED_INPUT_FIELDS {
            input.remove(field);
        }
        let cleaned = definition.params.clean(&input)?;

        if !definition.metadata.scheduling_enabled
            && (request.schedule_at.is_some() || request.interval.is_some())
        {
            return Err(CoreError::Validation(
                "Scheduling is not enabled for this script.".into(),
            ));
        }
        let now = Utc::now();
        if request.schedule_at.is_some_and(|at| at < now) {
            return Err(CoreError::Validation(
                "Scheduled time must be in the future.".into(),
            ));
        }
        // An interval without a start time starts now.
        let schedule_at = match (request.schedule_at, request.interval) {
            (None, Some(_)) => Some(now),
            (at, _) => at,
        };

        let allowed = self.task_queues(&instance);
        let queue = match request.task_queue.filter(|q| !q.is_empty()) {
            Some(queue) if allowed.contains(&queue) => queue,
            Some(queue) => {
                return Err(CoreError::Validation(format!(
                    "Select a valid choice. {queue} is not one of the available choices."
                )))
            }
            None => allowed
                .first()
                .cloned()
                .unwrap_or_else(|| self.default_queue.clone()),
        };

        let mut new = NewScriptExecution::new(instance.id, actor.clone(), queue, Value::Object(cleaned));
        if let Some(at) = schedule_at {
            new = new.scheduled_at(at);
        }
        if let Some(interval) = request.interval {
            new = new.interval(interval);
        }
        let execution = self.store.create_execution(&new).await?;

        let job = ScriptJob::for_execution(&execution, request.commit, definition.metadata.job_timeout);
        let enqueued = match execution.scheduled_at {
            Some(at) => self.queue.enqueue_at(at, job).await,
            None => self.queue.enqueue_now(job).await,
        };
        if let Err(e) = enqueued {
            self.store.delete_execution(execution.id).await?;
            return Err(e);
        }

        tracing::info!(
            execution_id = execution.id,
            script = %instance.script_path(),
            queue = %execution.task_queue,
            scheduled_at = ?execution.scheduled_at,
            commit = request.commit,
            "Script run submitted",
        );
        Ok(execution)
    }

    /// Run form of an instance, optionally pre-filled from an earlier run.
    pub async fn form(&self, instance_id: DbId, rerun_of: Option<DbId>) -> CoreResult<FormSpec> {
        let instance = self.instance(instance_id).await?;
        let definition = self
            .registry
            .load(&instance.module_path, &instance.class_name)
            .await?;

        let initial = match rerun_of {
            Some(execution_id) => {
                let execution = self.store.get_execution(execution_id).await?.ok_or(
                    CoreError::NotFound {
                        entity: "script execution",
                        id: execution_id,
                    },
                )?;
                let prior = execution.data.input.as_object().cloned().unwrap_or_default();
                Some(definition.params.initial_from_input(&prior))
            }
            None => None,
        };
        Ok(definition.form(&self.task_queues(&instance), initial.as_ref()))
    }

    // ---- Loading ----

    /// Discover scripts and register an instance for each one that does
    /// not have one yet.
    pub async fn load_scripts(&self) -> CoreResult<LoadReport> {
        let discovery = self.registry.discover().await;
        let mut report = LoadReport {
            failed: discovery.errors.clone(),
            ..LoadReport::default()
        };

        for (path, definition) in &discovery.scripts {
            if self
                .store
                .find_instance(&definition.module_path, &definition.class_name)
                .await?
                .is_some()
            {
                continue;
            }
            match self
                .store
                .create_instance(&NewScriptInstance::from_definition(definition))
                .await
            {
                Ok(instance) => {
                    tracing::info!(instance_id = instance.id, script = %path, "Loaded script");
                    report.loaded.push(path.clone());
                }
                Err(CoreError::Validation(message)) => {
                    report.failed.insert(
                        path.clone(),
                        LoadError::Invalid {
                            class_name: definition.class_name.clone(),
                            message,
                        },
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    // ---- Deletion ----

    /// Delete an execution and cancel its job if it has not run yet.
    pub async fn delete_execution(&self, id: DbId) -> CoreResult<bool> {
        let Some(execution) = self.store.get_execution(id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_execution(id).await?;
        self.cancel_job(JobHandle::from(&execution)).await;
        Ok(deleted)
    }

    /// Delete an instance with all its executions and cancel their jobs.
    pub async fn delete_instance(&self, id: DbId) -> CoreResult<bool> {
        let executions = self.store.list_executions(id).await?;
        let deleted = self.store.delete_instance(id).await?;
        for execution in &executions {
            self.cancel_job(JobHandle::from(execution)).await;
        }
        Ok(deleted)
    }

    async fn cancel_job(&self, handle: JobHandle) {
        match self.queue.fetch(handle).await {
            Ok(Some(handle)) => match self.queue.cancel(handle).await {
                Ok(true) => tracing::debug!(task_id = %handle, "Cancelled queued job"),
                Ok(false) => {}
                Err(e) => tracing::warn!(task_id = %handle, error = %e, "Failed to cancel job"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(task_id = %handle, error = %e, "Failed to look up job"),
        }
    }

    // ---- Queries ----

    pub async fn instances(&self) -> CoreResult<Vec<ScriptInstance>> {
        self.store.list_instances().await
    }

    pub async fn executions(&self, instance_id: DbId) -> CoreResult<Vec<ScriptExecution>> {
        self.store.list_executions(instance_id).await
    }

    pub async fn execution(&self, id: DbId) -> CoreResult<Option<ScriptExecution>> {
        self.store.get_execution(id).await
    }

    pub async fn logs(&self, execution_id: DbId) -> CoreResult<Vec<ScriptLogLine>> {
        self.sink.list_logs(execution_id).await
    }

    pub async fn artifacts(&self, execution_id: DbId) -> CoreResult<Vec<ScriptArtifact>> {
        self.sink.list_artifacts(execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn form(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn from_form_reads_execution_fields() {
        let request = SubmitRequest::from_form(form(json!({
            "site": "ams1",
            "_commit": "on",
            "_schedule_at": "2030-01-01T10:00:00Z",
            "_interval": "15",
            "_task_queue": "high"
        })))
        .unwrap();
        assert!(request.commit);
        assert_eq!(request.interval, Some(15));
        assert_eq!(request.task_queue.as_deref(), Some("high"));
        assert_eq!(
            request.schedule_at.unwrap().to_rfc3339(),
            "2030-01-01T10:00:00+00:00"
        );
        assert_eq!(request.data["site"], json!("ams1"));
    }

    #[test]
    fn from_form_treats_blank_fields_as_unset() {
        let request = SubmitRequest::from_form(form(json!({
            "_schedule_at": "",
            "_interval": " ",
        })))
        .unwrap();
        assert!(!request.commit);
        assert_eq!(request.schedule_at, None);
        assert_eq!(request.interval, None);
    }

    #[test]
    fn from_form_rejects_garbage() {
        assert_matches!(
            SubmitRequest::from_form(form(json!({"_schedule_at": "tomorrow"}))),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            SubmitRequest::from_form(form(json!({"_interval": "-5"}))),
            Err(CoreError::Validation(_))
        );
    }
}
