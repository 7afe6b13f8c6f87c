use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};

/// Script manager settings, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptManagerConfig {
    /// Directory containing the `customscripts` package.
    pub script_root: PathBuf,
    /// Where Python venvs for scripts with requirements are kept.
    pub venv_root: PathBuf,
    /// Queue used when a run does not name one.
    pub default_queue: String,
    /// Run `git pull` in the script root before discovery.
    pub git_sync: bool,
}

impl Default for ScriptManagerConfig {
    fn default() -> Self {
        let script_root = PathBuf::from("./scripts");
        Self {
            venv_root: script_root.join(".venvs"),
            script_root,
            default_queue: "default".into(),
            git_sync: false,
        }
    }
}

impl ScriptManagerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var           | Default              |
    /// |-------------------|----------------------|
    /// | `SCRIPT_ROOT`     | `./scripts`          |
    /// | `SCRIPT_VENV_DIR` | `$SCRIPT_ROOT/.venvs`|
    /// | `DEFAULT_QUEUE`   | `default`            |
    /// | `SCRIPT_GIT_SYNC` | `false`              |
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let defaults = Self::default();

        let script_root = lookup("SCRIPT_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.script_root);
        let venv_root = lookup("SCRIPT_VENV_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| script_root.join(".venvs"));

        let default_queue = lookup("DEFAULT_QUEUE")
            .map(|q| q.trim().to_string())
            .unwrap_or(defaults.default_queue);
        if default_queue.is_empty() {
            return Err(CoreError::Validation("DEFAULT_QUEUE must not be empty".into()));
        }

        let git_sync = match lookup("SCRIPT_GIT_SYNC") {
            None => defaults.git_sync,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                CoreError::Validation(format!("SCRIPT_GIT_SYNC must be a boolean, got {raw:?}"))
            })?,
        };

        Ok(Self {
            script_root,
            venv_root,
            default_queue,
            git_sync,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> CoreResult<ScriptManagerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ScriptManagerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(load(&[]).unwrap(), ScriptManagerConfig::default());
    }

    #[test]
    fn venv_root_follows_script_root() {
        let config = load(&[("SCRIPT_ROOT", "/srv/netbox/scripts"), ("SCRIPT_GIT_SYNC", "yes")]).unwrap();
        assert_eq!(config.venv_root, PathBuf::from("/srv/netbox/scripts/.venvs"));
        assert!(config.git_sync);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(load(&[("SCRIPT_GIT_SYNC", "maybe")]), Err(CoreError::Validation(_)));
        assert_matches!(load(&[("DEFAULT_QUEUE", "  ")]), Err(CoreError::Validation(_)));
    }
}
