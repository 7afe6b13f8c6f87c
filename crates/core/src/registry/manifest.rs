//! TOML module manifests.
//!
//! A module is one `customscripts/<name>.toml` file declaring any number of
//! scripts:
//!
//! ```toml
//! [scripts.CreateVlan]
//! name = "Create VLAN"
//! group = "IPAM"
//! commit_default = false
//! job_timeout = 300
//! runtime = "python"
//! entrypoint = "create_vlan.py"
//! requirements = "requirements.txt"
//!
//! [[scripts.CreateVlan.params]]
//! name = "vid"
//! type = "integer"
//! min_value = 1
//! max_value = 4094
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::{LoadError, ScriptDefinition, ScriptSource};
use crate::params::{ParamSchema, ParamSpec};
use crate::script::ScriptMetadata;
use crate::scripting::external::{ExternalSpec, DEFAULT_PROCESS_TIMEOUT};
use crate::scripting::Runtime;

/// Added to a declared job timeout for the child process, so the engine's
/// own timeout fires first.
const PROCESS_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default)]
    scripts: BTreeMap<String, ScriptEntry>,
}

#[derive(Debug, Deserialize)]
struct ScriptEntry {
    #[serde(flatten)]
    metadata: ScriptMetadata,
    #[serde(default)]
    params: Vec<ParamSpec>,
    runtime: Runtime,
    entrypoint: PathBuf,
    #[serde(default)]
    requirements: Option<PathBuf>,
    /// Keys nobody above claimed; must stay empty.
    #[serde(flatten)]
    unknown: BTreeMap<String, toml::Value>,
}

/// Parse a manifest into script definitions.
///
/// Paths are resolved but not checked for existence.
pub fn parse_manifest(
    module_path: &str,
    manifest_path: &Path,
    contents: &str,
    venv_root: &Path,
) -> Result<Vec<ScriptDefinition>, LoadError> {
    let manifest: ManifestFile = toml::from_str(contents).map_err(|e| LoadError::Parse {
        path: manifest_path.display().to_string(),
        message: e.to_string(),
    })?;
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));

    manifest
        .scripts
        .into_iter()
        .map(|(class_name, entry)| build(module_path, class_name, entry, base_dir, venv_root))
        .collect()
}

fn build(
    module_path: &str,
    class_name: String,
    entry: ScriptEntry,
    base_dir: &Path,
    venv_root: &Path,
) -> Result<ScriptDefinition, LoadError> {
    let invalid = |message: String| LoadError::Invalid {
        class_name: class_name.clone(),
        message,
    };

    if !is_identifier(&class_name) {
        return Err(invalid("class name must be an identifier".into()));
    }
    if !entry.unknown.is_empty() {
        let keys: Vec<&str> = entry.unknown.keys().map(String::as_str).collect();
        return Err(invalid(format!("unknown keys: {}", keys.join(", "))));
    }
    let params = ParamSchema(entry.params);
    params.check().map_err(invalid)?;
    if entry.requirements.is_some() && entry.runtime != Runtime::Python {
        return Err(invalid(format!(
            "requirements are only supported by the python runtime, not {}",
            entry.runtime
        )));
    }

    let mut metadata = entry.metadata;
    if metadata.name.is_empty() {
        metadata.name = class_name.clone();
    }
    let timeout = metadata
        .job_timeout
        .map(|secs| Duration::from_secs(secs) + PROCESS_GRACE)
        .unwrap_or(DEFAULT_PROCESS_TIMEOUT);

    let spec = ExternalSpec {
        runtime: entry.runtime,
        entrypoint: base_dir.join(entry.entrypoint),
        requirements: entry.requirements.map(|r| base_dir.join(r)),
        working_dir: base_dir.to_path_buf(),
        venv_root: venv_root.to_path_buf(),
        timeout,
    };

    Ok(ScriptDefinition {
        module_path: module_path.to_string(),
        class_name,
        metadata,
        params,
        source: ScriptSource::External(spec),
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::params::ParamType;

    const MANIFEST: &str = r#"
[scripts.CreateVlan]
name = "Create VLAN"
group = "IPAM"
commit_default = false
job_timeout = 300
task_queues = ["default", "high"]
runtime = "python"
entrypoint = "create_vlan.py"
requirements = "requirements.txt"

[[scripts.CreateVlan.params]]
name = "vid"
type = "integer"
min_value = 1
max_value = 4094

[[scripts.CreateVlan.params]]
name = "role"
type = "choice"
choices = ["access", "trunk"]
required = false

[scripts.Cleanup]
runtime = "shell"
entrypoint = "cleanup.sh"
scheduling_enabled = false
"#;

    fn parse(contents: &str) -> Result<Vec<ScriptDefinition>, LoadError> {
        parse_manifest(
            "customscripts.vlans",
            Path::new("/srv/scripts/customscripts/vlans.toml"),
            contents,
            Path::new("/srv/venvs"),
        )
    }

    #[test]
    fn parses_scripts_with_defaults() {
        let defs = parse(MANIFEST).unwrap();
        assert_eq!(defs.len(), 2);

        let cleanup = &defs[0];
        assert_eq!(cleanup.path(), "customscripts.vlans.Cleanup");
        assert_eq!(cleanup.metadata.name, "Cleanup");
        assert_eq!(cleanup.metadata.weight, 1000);
        assert!(cleanup.metadata.commit_default);
        assert!(!cleanup.metadata.scheduling_enabled);

        let vlan = &defs[1];
        assert_eq!(vlan.metadata.name, "Create VLAN");
        assert_eq!(vlan.metadata.group.as_deref(), Some("IPAM"));
        assert!(!vlan.metadata.commit_default);
        assert_eq!(vlan.metadata.job_timeout, Some(300));
        assert_eq!(vlan.metadata.task_queues, ["default", "high"]);
        assert_eq!(
            vlan.params.get("vid").unwrap().kind,
            ParamType::Integer {
                min_value: Some(1),
                max_value: Some(4094)
            }
        );
        assert!(!vlan.params.get("role").unwrap().is_required());

        let ScriptSource::External(spec) = &vlan.source else {
            panic!("expected external source");
        };
        assert_eq!(spec.runtime, Runtime::Python);
        assert_eq!(spec.entrypoint, Path::new("/srv/scripts/customscripts/create_vlan.py"));
        assert_eq!(
            spec.requirements.as_deref(),
            Some(Path::new("/srv/scripts/customscripts/requirements.txt"))
        );
        assert_eq!(spec.timeout, Duration::from_secs(305));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert_matches!(parse("[scripts.X\nruntime ="), Err(LoadError::Parse { .. }));
    }

    #[test]
    fn unknown_param_type_is_rejected() {
        let manifest = r#"
[scripts.X]
runtime = "shell"
entrypoint = "x.sh"
[[scripts.X.params]]
name = "a"
type = "object_var"
"#;
        assert_matches!(parse(manifest), Err(LoadError::Parse { .. }));
    }

    #[test]
    fn requirements_need_python() {
        let manifest = r#"
[scripts.X]
runtime = "shell"
entrypoint = "x.sh"
requirements = "requirements.txt"
"#;
        assert_matches!(
            parse(manifest),
            Err(LoadError::Invalid { class_name, .. }) if class_name == "X"
        );
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        let manifest = r#"
[scripts.X]
runtime = "shell"
entrypoint = "x.sh"
job_timout = 30
"#;
        assert_matches!(
            parse(manifest),
            Err(LoadError::Invalid { class_name, message })
                if class_name == "X" && message == "unknown keys: job_timout"
        );
    }

    #[test]
    fn class_names_must_be_identifiers() {
        let manifest = "[scripts.\"bad name\"]\nruntime = \"shell\"\nentrypoint = \"x.sh\"\n";
        assert_matches!(parse(manifest), Err(LoadError::Invalid { .. }));
    }

    #[test]
    fn empty_manifest_declares_nothing() {
        assert!(parse("").unwrap().is_empty());
    }
}
