use std::time::Duration;

use anyhow::{bail, Context};
use scriptmgr_core::config::ScriptManagerConfig;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Separate database for log lines and artifacts; the main database
    /// when unset.
    pub log_database_url: Option<String>,
    pub db_max_connections: u32,
    /// Queues this worker consumes.
    pub queues: Vec<String>,
    /// Maximum number of scripts running at once.
    pub concurrency: u32,
    pub poll_interval: Duration,
    /// Name recorded on claimed jobs.
    pub worker_name: String,
    /// How long finished jobs are kept.
    pub job_retention: chrono::Duration,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
    pub scripts: ScriptManagerConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default                   |
    /// |-----------------------|---------------------------|
    /// | `DATABASE_URL`        | required                  |
    /// | `LOG_DATABASE_URL`    | `DATABASE_URL`            |
    /// | `DB_MAX_CONNECTIONS`  | `20`                      |
    /// | `WORKER_QUEUES`       | `$DEFAULT_QUEUE`          |
    /// | `WORKER_CONCURRENCY`  | `4`                       |
    /// | `POLL_INTERVAL_MS`    | `1000`                    |
    /// | `WORKER_NAME`         | `worker-<pid>`            |
    /// | `JOB_RETENTION_HOURS` | `168`                     |
    /// | `LOG_FORMAT`          | `text` (`json` to switch) |
    ///
    /// Script settings come from [`ScriptManagerConfig::from_env`].
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let scripts = ScriptManagerConfig::from_lookup(&lookup)?;

        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let log_database_url = lookup("LOG_DATABASE_URL").filter(|u| !u.trim().is_empty());

        let db_max_connections: u32 = parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?;
        let concurrency: u32 = parse_or(&lookup, "WORKER_CONCURRENCY", 4)?;
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }
        let poll_interval_ms: u64 = parse_or(&lookup, "POLL_INTERVAL_MS", 1000)?;
        let retention_hours: i64 = parse_or(&lookup, "JOB_RETENTION_HOURS", 168)?;

        let queues: Vec<String> = lookup("WORKER_QUEUES")
            .unwrap_or_else(|| scripts.default_queue.clone())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if queues.is_empty() {
            bail!("WORKER_QUEUES must name at least one queue");
        }

        let worker_name = lookup("WORKER_NAME")
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let json_logs = lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            database_url,
            log_database_url,
            db_max_connections,
            queues,
            concurrency,
            poll_interval: Duration::from_millis(poll_interval_ms),
            worker_name,
            job_retention: chrono::Duration::hours(retention_hours),
            json_logs,
            scripts,
        })
    }
}

fn parse_or<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
    }
}
