//! In-process backends for the storage, queue and change-tracking seams.
//!
//! Used by tests and by embedders that do not need durability.
//! [`MemoryTransaction`] stages key/value writes that only become visible
//! through [`MemoryStore::record`] once committed.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::execution::{NewScriptExecution, ScriptExecution};
use crate::models::{
    NewScriptArtifact, NewScriptInstance, ScriptArtifact, ScriptInstance, ScriptLogLine,
};
use crate::queue::{JobHandle, QueueAdapter, ScriptJob};
use crate::status::LogLevel;
use crate::store::{ChangeTracker, LogSink, ScriptStore, Transaction};
use crate::types::{DbId, Timestamp};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    last_id: DbId,
    instances: BTreeMap<DbId, ScriptInstance>,
    executions: BTreeMap<DbId, ScriptExecution>,
    logs: Vec<ScriptLogLine>,
    artifacts: Vec<ScriptArtifact>,
    records: BTreeMap<String, Value>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }
}

/// [`ScriptStore`] and [`LogSink`] over shared in-process state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value written through a committed [`MemoryTransaction`].
    pub fn record(&self, key: &str) -> Option<Value> {
        lock(&self.state).records.get(key).cloned()
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }

    async fn create_instance(&self, new: &NewScriptInstance) -> CoreResult<ScriptInstance> {
        validator::Validate::validate(new).map_err(|e| CoreError::Validation(e.to_string()))?;
        let mut state = lock(&self.state);
        if state
            .instances
            .values()
            .any(|i| i.module_path == new.module_path && i.class_name == new.class_name)
        {
            return Err(CoreError::Validation(
                "Script instance with this Module path and Class name already exists.".into(),
            ));
        }
        let now = Utc::now();
        let instance = ScriptInstance {
            id: state.next_id(),
            name: new.name.clone(),
            module_path: new.module_path.clone(),
            class_name: new.class_name.clone(),
            group: new.group.clone(),
            weight: new.weight,
            description: new.description.clone(),
            task_queues: new.task_queues.clone(),
            tenant_id: new.tenant_id,
            created_at: now,
            updated_at: now,
        };
        state.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: DbId) -> CoreResult<Option<ScriptInstance>> {
        Ok(lock(&self.state).instances.get(&id).cloned())
    }

    async fn find_instance(
        &self,
        module_path: &str,
        class_name: &str,
    ) -> CoreResult<Option<ScriptInstance>> {
        Ok(lock(&self.state)
            .instances
            .values()
            .find(|i| i.module_path == module_path && i.class_name == class_name)
            .cloned())
    }

    async fn list_instances(&self) -> CoreResult<Vec<ScriptInstance>> {
        let mut instances: Vec<_> = lock(&self.state).instances.values().cloned().collect();
        instances.sort_by(|a, b| {
            (&a.group, a.weight, &a.name).cmp(&(&b.group, b.weight, &b.name))
        });
        Ok(instances)
    }

    async fn delete_instance(&self, id: DbId) -> CoreResult<bool> {
        let mut state = lock(&self.state);
        if state.instances.remove(&id).is_none() {
            return Ok(false);
        }
        let doomed: Vec<DbId> = state
            .executions
            .values()
            .filter(|e| e.script_instance_id == id)
            .map(|e| e.id)
            .collect();
        for execution_id in &doomed {
            state.executions.remove(execution_id);
        }
        state.logs.retain(|l| !doomed.contains(&l.script_execution_id));
        state.artifacts.retain(|a| !doomed.contains(&a.script_execution_id));
        Ok(true)
    }

    async fn create_execution(&self, new: &NewScriptExecution) -> CoreResult<ScriptExecution> {
        new.check()?;
        let mut state = lock(&self.state);
        if !state.instances.contains_key(&new.script_instance_id) {
            return Err(CoreError::NotFound {
                entity: "script instance",
                id: new.script_instance_id,
            });
        }
        if state
            .executions
            .values()
            .any(|e| e.task_id == new.task_id || e.request_id == new.request_id)
        {
            return Err(CoreError::Validation(
                "Execution task_id and request_id must be unique".into(),
            ));
        }
        let execution = new.clone().into_execution(state.next_id(), Utc::now());
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: DbId) -> CoreResult<Option<ScriptExecution>> {
        Ok(lock(&self.state).executions.get(&id).cloned())
    }

    async fn save_execution(&self, execution: &ScriptExecution) -> CoreResult<()> {
        let mut state = lock(&self.state);
        match state.executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(CoreError::NotFound {
                entity: "script execution",
                id: execution.id,
            }),
        }
    }

    async fn delete_execution(&self, id: DbId) -> CoreResult<bool> {
        let mut state = lock(&self.state);
        if state.executions.remove(&id).is_none() {
            return Ok(false);
        }
        state.logs.retain(|l| l.script_execution_id != id);
        state.artifacts.retain(|a| a.script_execution_id != id);
        Ok(true)
    }

    async fn list_executions(&self, instance_id: DbId) -> CoreResult<Vec<ScriptExecution>> {
        let mut executions: Vec<_> = lock(&self.state)
            .executions
            .values()
            .filter(|e| e.script_instance_id == instance_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(executions)
    }
}

#[async_trait]
impl LogSink for MemoryStore {
    async fn append_log(
        &self,
        execution_id: DbId,
        level: LogLevel,
        message: &str,
    ) -> CoreResult<ScriptLogLine> {
        let mut state = lock(&self.state);
        let line = ScriptLogLine {
            id: state.next_id(),
            script_execution_id: execution_id,
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        state.logs.push(line.clone());
        Ok(line)
    }

    async fn save_artifact(&self, new: &NewScriptArtifact) -> CoreResult<ScriptArtifact> {
        let mut state = lock(&self.state);
        let artifact = ScriptArtifact {
            id: state.next_id(),
            script_execution_id: new.script_execution_id,
            name: new.name.clone(),
            content_type: new.content_type.clone(),
            data: new.data.clone(),
        };
        state.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn list_logs(&self, execution_id: DbId) -> CoreResult<Vec<ScriptLogLine>> {
        let mut lines: Vec<_> = lock(&self.state)
            .logs
            .iter()
            .filter(|l| l.script_execution_id == execution_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.timestamp, l.id));
        Ok(lines)
    }

    async fn list_artifacts(&self, execution_id: DbId) -> CoreResult<Vec<ScriptArtifact>> {
        Ok(lock(&self.state)
            .artifacts
            .iter()
            .filter(|a| a.script_execution_id == execution_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryTransaction
// ---------------------------------------------------------------------------

/// Staged key/value writes of one run.
pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    staged: Vec<(String, Value)>,
}

impl MemoryTransaction {
    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.staged.push((key.into(), value));
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let this = *self;
        let mut state = lock(&this.state);
        for (key, value) in this.staged {
            state.records.insert(key, value);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// A job waiting in a [`MemoryQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job: ScriptJob,
    /// `None` for immediate jobs.
    pub run_at: Option<Timestamp>,
}

/// FIFO queue that only records jobs; callers drain it themselves.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the waiting jobs in enqueue order.
    pub fn jobs(&self) -> Vec<QueuedJob> {
        lock(&self.jobs).clone()
    }

    /// Remove and return every job due at `now`.
    pub fn take_due(&self, now: Timestamp) -> Vec<ScriptJob> {
        let mut jobs = lock(&self.jobs);
        let (due, later): (Vec<_>, Vec<_>) = jobs
            .drain(..)
            .partition(|q| q.run_at.map_or(true, |at| at <= now));
        *jobs = later;
        due.into_iter().map(|q| q.job).collect()
    }

    fn push(&self, job: ScriptJob, run_at: Option<Timestamp>) -> JobHandle {
        let handle = job.handle();
        lock(&self.jobs).push(QueuedJob { job, run_at });
        handle
    }
}

#[async_trait]
impl QueueAdapter for MemoryQueue {
    async fn enqueue_now(&self, job: ScriptJob) -> CoreResult<JobHandle> {
        Ok(self.push(job, None))
    }

    async fn enqueue_at(&self, at: Timestamp, job: ScriptJob) -> CoreResult<JobHandle> {
        Ok(self.push(job, Some(at)))
    }

    async fn cancel(&self, handle: JobHandle) -> CoreResult<bool> {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|q| q.job.handle() != handle);
        Ok(jobs.len() != before)
    }

    async fn fetch(&self, handle: JobHandle) -> CoreResult<Option<JobHandle>> {
        Ok(lock(&self.jobs)
            .iter()
            .any(|q| q.job.handle() == handle)
            .then_some(handle))
    }
}

// ---------------------------------------------------------------------------
// RecordingChangeTracker
// ---------------------------------------------------------------------------

/// Remembers which request ids were flushed or discarded.
#[derive(Debug, Default)]
pub struct RecordingChangeTracker {
    flushed: Mutex<Vec<Uuid>>,
    discarded: Mutex<Vec<Uuid>>,
}

impl RecordingChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushed(&self) -> Vec<Uuid> {
        lock(&self.flushed).clone()
    }

    pub fn discarded(&self) -> Vec<Uuid> {
        lock(&self.discarded).clone()
    }
}

#[async_trait]
impl ChangeTracker for RecordingChangeTracker {
    async fn flush(&self, request_id: Uuid) -> CoreResult<()> {
        lock(&self.flushed).push(request_id);
        Ok(())
    }

    async fn discard(&self, request_id: Uuid) {
        lock(&self.discarded).push(request_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::types::Actor;

    fn instance(class: &str) -> NewScriptInstance {
        NewScriptInstance {
            name: class.into(),
            module_path: "customscripts.net".into(),
            class_name: class.into(),
            group: None,
            weight: 1000,
            description: None,
            task_queues: vec![],
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn instance_path_is_unique() {
        let store = MemoryStore::new();
        store.create_instance(&instance("A")).await.unwrap();
        assert_matches!(
            store.create_instance(&instance("A")).await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn deleting_an_instance_cascades() {
        let store = MemoryStore::new();
        let inst = store.create_instance(&instance("A")).await.unwrap();
        let exec = store
            .create_execution(&NewScriptExecution::new(inst.id, Actor::default(), "default", json!({})))
            .await
            .unwrap();
        store.append_log(exec.id, LogLevel::Info, "hi").await.unwrap();

        assert!(store.delete_instance(inst.id).await.unwrap());
        assert!(store.get_execution(exec.id).await.unwrap().is_none());
        assert!(store.list_logs(exec.id).await.unwrap().is_empty());
        assert!(!store.delete_instance(inst.id).await.unwrap());
    }

    #[tokio::test]
    async fn execution_needs_an_instance() {
        let store = MemoryStore::new();
        assert_matches!(
            store
                .create_execution(&NewScriptExecution::new(99, Actor::default(), "default", json!({})))
                .await,
            Err(CoreError::NotFound { id: 99, .. })
        );
    }

    #[tokio::test]
    async fn transaction_writes_are_visible_only_after_commit() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.as_any_mut()
            .downcast_mut::<MemoryTransaction>()
            .unwrap()
            .put("vlan", json!(10));
        tx.rollback().await.unwrap();
        assert_eq!(store.record("vlan"), None);

        let mut tx = store.begin().await.unwrap();
        tx.as_any_mut()
            .downcast_mut::<MemoryTransaction>()
            .unwrap()
            .put("vlan", json!(20));
        tx.commit().await.unwrap();
        assert_eq!(store.record("vlan"), Some(json!(20)));
    }

    #[tokio::test]
    async fn queue_cancel_and_fetch() {
        let queue = MemoryQueue::new();
        let job = ScriptJob {
            job_id: Uuid::new_v4(),
            data: json!({}),
            actor: Actor::default(),
            commit: true,
            execution_id: 1,
            queue: "default".into(),
            interval: None,
            timeout_secs: None,
        };
        let handle = queue
            .enqueue_at(Utc::now() + Duration::hours(1), job.clone())
            .await
            .unwrap();
        assert_eq!(handle, job.handle());
        assert_eq!(queue.fetch(handle).await.unwrap(), Some(handle));
        assert!(queue.take_due(Utc::now()).is_empty());

        assert!(queue.cancel(handle).await.unwrap());
        assert!(!queue.cancel(handle).await.unwrap());
        assert_eq!(queue.fetch(handle).await.unwrap(), None);
    }
}
