#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use scriptmgr_core::config::ScriptManagerConfig;
use scriptmgr_core::memory::{MemoryQueue, MemoryStore, MemoryTransaction, RecordingChangeTracker};
use scriptmgr_core::models::ScriptInstance;
use scriptmgr_core::params::ParamSchema;
use scriptmgr_core::registry::{Registry, ScriptDefinition};
use scriptmgr_core::store::ScriptStore;
use scriptmgr_core::{Engine, Script, ScriptContext, ScriptFailure, ScriptManager, ScriptMetadata};

pub const MODULE: &str = "customscripts.tests";

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Writes `vlan = data.vid` into the run's transaction.
#[derive(Default)]
pub struct WriteRecord;

#[async_trait]
impl Script for WriteRecord {
    async fn run(&self, ctx: &mut ScriptContext, data: &Value, _commit: bool) -> Result<Value, ScriptFailure> {
        let vid = data.get("vid").cloned().unwrap_or(Value::Null);
        if let Some(tx) = ctx.transaction_mut::<MemoryTransaction>() {
            tx.put("vlan", vid.clone());
        }
        ctx.log_info(format!("Created VLAN {vid}")).await?;
        Ok(json!("done"))
    }
}

#[derive(Default)]
pub struct Explode;

#[async_trait]
impl Script for Explode {
    async fn run(&self, _ctx: &mut ScriptContext, _data: &Value, _commit: bool) -> Result<Value, ScriptFailure> {
        let n: i32 = "x".parse()?;
        Ok(json!(n))
    }
}

#[derive(Default)]
pub struct Abort;

#[async_trait]
impl Script for Abort {
    async fn run(&self, _ctx: &mut ScriptContext, _data: &Value, _commit: bool) -> Result<Value, ScriptFailure> {
        Err(ScriptFailure::abort("no site"))
    }
}

#[derive(Default)]
pub struct Sleeper;

#[async_trait]
impl Script for Sleeper {
    async fn run(&self, _ctx: &mut ScriptContext, _data: &Value, _commit: bool) -> Result<Value, ScriptFailure> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[derive(Default)]
pub struct Report;

#[async_trait]
impl Script for Report {
    async fn run(&self, ctx: &mut ScriptContext, _data: &Value, _commit: bool) -> Result<Value, ScriptFailure> {
        ctx.save_artifact("report.txt", "héllo wörld", "text/plain", "utf-8")
            .await?;
        Ok(Value::Null)
    }
}

pub fn native<S>(class_name: &str, metadata: ScriptMetadata, params: ParamSchema) -> ScriptDefinition
where
    S: Script + Default + 'static,
{
    ScriptDefinition::native(MODULE, class_name, metadata, params, || -> Box<dyn Script> {
        Box::new(S::default())
    })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub store: MemoryStore,
    pub queue: Arc<MemoryQueue>,
    pub changes: Arc<RecordingChangeTracker>,
    pub registry: Arc<Registry>,
    pub engine: Engine,
    pub manager: ScriptManager,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ScriptManagerConfig {
            script_root: dir.path().to_path_buf(),
            venv_root: dir.path().join(".venvs"),
            ..ScriptManagerConfig::default()
        };
        let store = MemoryStore::new();
        let queue = Arc::new(MemoryQueue::new());
        let changes = Arc::new(RecordingChangeTracker::new());
        let registry = Arc::new(Registry::from_config(&config));
        let engine = Engine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            queue.clone(),
            registry.clone(),
        )
        .with_change_tracker(changes.clone());
        let manager = ScriptManager::new(&engine, &config);
        Self {
            dir,
            store,
            queue,
            changes,
            registry,
            engine,
            manager,
        }
    }

    /// Register a native script and create its instance.
    pub async fn install(&self, definition: ScriptDefinition) -> ScriptInstance {
        let (module_path, class_name) = (definition.module_path.clone(), definition.class_name.clone());
        self.registry.register_native(definition);
        self.manager.load_scripts().await.unwrap();
        self.store
            .find_instance(&module_path, &class_name)
            .await
            .unwrap()
            .unwrap()
    }

    pub fn write_module(&self, name: &str, contents: &str) {
        let dir = self.dir.path().join("customscripts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.toml")), contents).unwrap();
    }

    pub fn write_entrypoint(&self, name: &str, body: &str) {
        write_file(&self.dir.path().join("customscripts").join(name), body);
    }
}

pub fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}
