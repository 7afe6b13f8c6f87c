use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scriptmgr_core::registry::Registry;
use scriptmgr_core::{Engine, ScriptManager};
use scriptmgr_db::{PgLogSink, PgQueue, PgScriptStore};
use scriptmgr_worker::config::WorkerConfig;
use scriptmgr_worker::dispatcher::Dispatcher;
use scriptmgr_worker::retention;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.json_logs);

    let pool = scriptmgr_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    scriptmgr_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    scriptmgr_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // Log lines are written on their own pool so they outlive a rolled-back
    // script transaction.
    let log_url = config.log_database_url.as_deref().unwrap_or(&config.database_url);
    let log_pool = scriptmgr_db::create_pool(log_url, config.db_max_connections)
        .await
        .context("Failed to connect to log database")?;

    let registry = Arc::new(Registry::from_config(&config.scripts));
    if config.scripts.git_sync {
        match registry.sync().await {
            Ok(output) => tracing::info!(output = %output.trim(), "Script repository pulled"),
            Err(e) => tracing::warn!(error = %e, "Script repository sync failed"),
        }
    }

    let queue = PgQueue::new(pool.clone());
    let engine = Arc::new(Engine::new(
        Arc::new(PgScriptStore::new(pool.clone())),
        Arc::new(PgLogSink::new(log_pool)),
        Arc::new(queue.clone()),
        Arc::clone(&registry),
    ));

    let manager = ScriptManager::new(&engine, &config.scripts);
    let report = manager.load_scripts().await?;
    for (module, error) in &report.failed {
        tracing::warn!(module = %module, error = %error, "Script module not loaded");
    }
    tracing::info!(
        new_instances = report.loaded.len(),
        failed_modules = report.failed.len(),
        "Scripts loaded",
    );

    let cancel = CancellationToken::new();

    let dispatcher = Dispatcher::new(Arc::clone(&engine), queue.clone(), &config);
    let dispatch_cancel = cancel.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatcher.run(dispatch_cancel).await;
    });
    let retention_handle = tokio::spawn(retention::run(
        queue,
        config.job_retention,
        cancel.clone(),
    ));

    shutdown_signal().await;
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    // Running scripts are allowed to finish.
    let _ = dispatch_handle.await;
    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scriptmgr_worker=debug,scriptmgr_core=info,scriptmgr_db=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
