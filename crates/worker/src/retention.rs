//! Periodic cleanup of finished jobs.
//!
//! Execution records are kept; only the `script_jobs` rows of finished
//! jobs older than the retention period are deleted.

use std::time::Duration;

use chrono::Utc;
use scriptmgr_db::PgQueue;
use tokio_util::sync::CancellationToken;

/// How often the cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the cleanup loop until `cancel` is triggered.
pub async fn run(queue: PgQueue, retention: chrono::Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_hours = retention.num_hours(),
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Job retention task started",
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match queue.purge_finished(Utc::now() - retention).await {
                    Ok(0) => tracing::debug!("Job retention: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Job retention: purged finished jobs"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
