//! Script discovery and hot reload.
//!
//! Scripts come from two places: TOML manifests under
//! `<root>/customscripts/`, re-read from disk on every discovery, and
//! native scripts compiled into the host and registered at startup.
//!
//! Discovery runs one at a time. Each run publishes a new immutable
//! [`Discovery`] generation; readers take an `Arc` snapshot and never wait
//! on a running discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::config::ScriptManagerConfig;
use crate::error::{CoreError, CoreResult};
use crate::form::FormSpec;
use crate::params::ParamSchema;
use crate::script::{Script, ScriptMetadata};
use crate::scripting::external::{ExternalScript, ExternalSpec};

pub mod manifest;
pub mod sync;

/// Subdirectory of the script root holding module manifests, and the
/// prefix of their module paths.
pub const SCRIPTS_PACKAGE: &str = "customscripts";

const MANIFEST_EXTENSION: &str = "toml";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Builds a fresh native script instance per run.
pub type ScriptFactory = Arc<dyn Fn() -> Box<dyn Script> + Send + Sync>;

#[derive(Clone)]
pub enum ScriptSource {
    Native(ScriptFactory),
    External(ExternalSpec),
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::External(spec) => f.debug_tuple("External").field(spec).finish(),
        }
    }
}

/// A discovered script: identity, metadata, parameters and how to run it.
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    pub module_path: String,
    pub class_name: String,
    pub metadata: ScriptMetadata,
    pub params: ParamSchema,
    pub source: ScriptSource,
}

impl ScriptDefinition {
    /// Definition of a script compiled into the host.
    pub fn native<F>(
        module_path: impl Into<String>,
        class_name: impl Into<String>,
        mut metadata: ScriptMetadata,
        params: ParamSchema,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn Script> + Send + Sync + 'static,
    {
        let class_name = class_name.into();
        if metadata.name.is_empty() {
            metadata.name = class_name.clone();
        }
        Self {
            module_path: module_path.into(),
            class_name,
            metadata,
            params,
            source: ScriptSource::Native(Arc::new(factory)),
        }
    }

    /// Registry key, `module_path.class_name`.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module_path, self.class_name)
    }

    pub fn instantiate(&self) -> Box<dyn Script> {
        match &self.source {
            ScriptSource::Native(factory) => factory(),
            ScriptSource::External(spec) => Box::new(ExternalScript::new(spec.clone())),
        }
    }

    pub fn form(&self, task_queues: &[String], initial: Option<&Map<String, Value>>) -> FormSpec {
        FormSpec::build(&self.params, &self.metadata, task_queues, initial)
    }
}

// ---------------------------------------------------------------------------
// Errors and generations
// ---------------------------------------------------------------------------

/// Why a module could not be loaded. Other modules are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("could not read {path}: {message}")]
    Read { path: String, message: String },

    #[error("could not parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid script {class_name}: {message}")]
    Invalid { class_name: String, message: String },
}

/// One generation of discovered scripts.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Keyed by `module_path.class_name`.
    pub scripts: BTreeMap<String, Arc<ScriptDefinition>>,
    /// Keyed by module path.
    pub errors: BTreeMap<String, LoadError>,
}

impl Discovery {
    pub fn get(&self, path: &str) -> Option<&Arc<ScriptDefinition>> {
        self.scripts.get(path)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct Registry {
    root: PathBuf,
    venv_root: PathBuf,
    natives: RwLock<BTreeMap<String, Arc<ScriptDefinition>>>,
    current: RwLock<Arc<Discovery>>,
    discovery: Mutex<()>,
}

impl Registry {
    /// Registry over `root`; venvs default to `<root>/.venvs`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let venv_root = root.join(".venvs");
        Self {
            root,
            venv_root,
            natives: RwLock::new(BTreeMap::new()),
            current: RwLock::new(Arc::new(Discovery::default())),
            discovery: Mutex::new(()),
        }
    }

    pub fn from_config(config: &ScriptManagerConfig) -> Self {
        Self::new(&config.script_root).with_venv_root(&config.venv_root)
    }

    pub fn with_venv_root(mut self, venv_root: impl Into<PathBuf>) -> Self {
        self.venv_root = venv_root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(SCRIPTS_PACKAGE)
    }

    /// Add a compiled-in script. It is part of every discovery from now on;
    /// a later registration under the same path replaces it.
    pub fn register_native(&self, definition: ScriptDefinition) {
        let path = definition.path();
        tracing::debug!(script = %path, "Registered native script");
        self.natives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, Arc::new(definition));
    }

    /// The latest published generation.
    pub fn snapshot(&self) -> Arc<Discovery> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<Arc<ScriptDefinition>> {
        self.snapshot().get(path).cloned()
    }

    /// Re-read every module and publish the result as the new generation.
    ///
    /// Broken modules are reported in [`Discovery::errors`] and never abort
    /// the scan.
    pub async fn discover(&self) -> Arc<Discovery> {
        let _guard = self.discovery.lock().await;

        let mut discovery = Discovery::default();
        for (module_path, file) in self.module_files().await {
            match self.load_module(&module_path, &file).await {
                Ok(definitions) => {
                    for definition in definitions {
                        discovery.scripts.insert(definition.path(), Arc::new(definition));
                    }
                }
                Err(e) => {
                    tracing::warn!(module = %module_path, error = %e, "Failed to load script module");
                    discovery.errors.insert(module_path, e);
                }
            }
        }
        for (path, definition) in self.natives.read().unwrap_or_else(PoisonError::into_inner).iter() {
            discovery.scripts.insert(path.clone(), Arc::clone(definition));
        }

        tracing::info!(
            scripts = discovery.scripts.len(),
            failed_modules = discovery.errors.len(),
            "Script discovery complete",
        );

        let discovery = Arc::new(discovery);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&discovery);
        discovery
    }

    /// Load one script fresh from disk (or the native table).
    pub async fn load(&self, module_path: &str, class_name: &str) -> CoreResult<Arc<ScriptDefinition>> {
        let _guard = self.discovery.lock().await;
        let path = format!("{module_path}.{class_name}");

        if let Some(native) = self
            .natives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
        {
            return Ok(Arc::clone(native));
        }

        let Some(file) = self.module_file(module_path) else {
            return Err(CoreError::ScriptNotFound(path));
        };
        let definitions = match self.load_module(module_path, &file).await {
            Ok(definitions) => definitions,
            Err(LoadError::Read { .. }) if !file.exists() => {
                return Err(CoreError::ScriptNotFound(path));
            }
            Err(source) => {
                return Err(CoreError::ModuleLoad {
                    module: module_path.to_string(),
                    source,
                });
            }
        };

        definitions
            .into_iter()
            .find(|d| d.class_name == class_name)
            .map(Arc::new)
            .ok_or(CoreError::ScriptNotFound(path))
    }

    /// Pull the script repository. Failures are returned, never fatal.
    pub async fn sync(&self) -> CoreResult<String> {
        sync::git_pull(&self.root).await
    }

    // ---- Helpers ----

    /// Manifest file of a `customscripts.<name>` module path.
    fn module_file(&self, module_path: &str) -> Option<PathBuf> {
        let name = module_path.strip_prefix(SCRIPTS_PACKAGE)?.strip_prefix('.')?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(self.scripts_dir().join(format!("{name}.{MANIFEST_EXTENSION}")))
    }

    /// `(module_path, file)` of every manifest, sorted by module path.
    async fn module_files(&self) -> Vec<(String, PathBuf)> {
        let dir = self.scripts_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "Script directory does not exist");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "Failed to list script directory");
                return Vec::new();
            }
        };

        let mut modules = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') || stem.starts_with('_') {
                continue;
            }
            modules.push((format!("{SCRIPTS_PACKAGE}.{stem}"), path));
        }
        modules.sort();
        modules
    }

    async fn load_module(&self, module_path: &str, file: &Path) -> Result<Vec<ScriptDefinition>, LoadError> {
        let contents = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| LoadError::Read {
                path: file.display().to_string(),
                message: e.to_string(),
            })?;
        let definitions = manifest::parse_manifest(module_path, file, &contents, &self.venv_root)?;

        for definition in &definitions {
            if let ScriptSource::External(spec) = &definition.source {
                let required = std::iter::once(&spec.entrypoint).chain(spec.requirements.as_ref());
                for path in required {
                    if tokio::fs::metadata(path).await.is_err() {
                        return Err(LoadError::Invalid {
                            class_name: definition.class_name.clone(),
                            message: format!("{} does not exist", path.display()),
                        });
                    }
                }
            }
        }
        Ok(definitions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
