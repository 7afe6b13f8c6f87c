//! Job dispatcher.
//!
//! Polls the job table every `poll_interval` and runs claimed jobs on
//! their own tasks, at most `concurrency` at a time. Claiming goes through
//! [`PgQueue::claim_next`], so several workers can share one database.

use std::sync::Arc;
use std::time::Duration;

use scriptmgr_core::error::CoreResult;
use scriptmgr_core::queue::ScriptJob;
use scriptmgr_core::Engine;
use scriptmgr_db::PgQueue;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

pub struct Dispatcher {
    engine: Arc<Engine>,
    queue: PgQueue,
    queues: Vec<String>,
    worker_name: String,
    poll_interval: Duration,
    concurrency: u32,
    slots: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, queue: PgQueue, config: &WorkerConfig) -> Self {
        Self {
            engine,
            queue,
            queues: config.queues.clone(),
            worker_name: config.worker_name.clone(),
            poll_interval: config.poll_interval,
            concurrency: config.concurrency,
            slots: Arc::new(Semaphore::new(config.concurrency as usize)),
        }
    }

    /// Run the dispatch loop until `cancel` fires, then wait for the
    /// scripts still running.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            queues = ?self.queues,
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_ready().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }

        let in_flight = self.concurrency as usize - self.slots.available_permits();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for running scripts");
        }
        let _ = self.slots.acquire_many(self.concurrency).await;
        tracing::info!("Dispatcher stopped");
    }

    /// Claim and start due jobs while slots are free. Returns how many
    /// were started.
    pub async fn dispatch_ready(&self) -> CoreResult<usize> {
        let mut started = 0;
        while let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            let Some(job) = self
                .queue
                .claim_next(&self.queues, &self.worker_name)
                .await?
            else {
                break;
            };
            tracing::info!(
                task_id = %job.job_id,
                execution_id = job.execution_id,
                queue = %job.queue,
                "Job claimed",
            );

            let engine = Arc::clone(&self.engine);
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_claimed(&engine, &queue, job).await;
            });
            started += 1;
        }
        Ok(started)
    }
}

/// Run one claimed job and mark it finished.
async fn run_claimed(engine: &Engine, queue: &PgQueue, job: ScriptJob) {
    let handle = job.handle();
    let error = match engine.run_job(&job).await {
        Ok(Some(outcome)) => {
            tracing::info!(
                task_id = %handle,
                execution_id = job.execution_id,
                status = %outcome.status,
                "Job finished",
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::error!(
                task_id = %handle,
                execution_id = job.execution_id,
                error = %e,
                "Job failed",
            );
            Some(e.to_string())
        }
    };
    if let Err(e) = queue.finish(handle, error.as_deref()).await {
        tracing::error!(task_id = %handle, error = %e, "Failed to mark job finished");
    }
}
