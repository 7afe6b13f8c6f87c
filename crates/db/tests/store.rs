//! Integration tests for the PostgreSQL store and log sink.

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use scriptmgr_core::error::CoreError;
use scriptmgr_core::execution::{NewScriptExecution, MAX_INTERVAL_MINUTES};
use scriptmgr_core::models::{NewScriptArtifact, NewScriptInstance, ScriptInstance};
use scriptmgr_core::status::{ExecutionStatus, LogLevel};
use scriptmgr_core::store::{LogSink, ScriptStore};
use scriptmgr_core::types::Actor;
use scriptmgr_db::{PgLogSink, PgScriptStore, PgTransaction};
use serde_json::json;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_instance(class_name: &str) -> NewScriptInstance {
    NewScriptInstance {
        name: class_name.to_string(),
        module_path: "customscripts.vlans".to_string(),
        class_name: class_name.to_string(),
        group: Some("IPAM".to_string()),
        weight: 1000,
        description: None,
        task_queues: vec!["default".to_string(), "high".to_string()],
        tenant_id: None,
    }
}

async fn instance(store: &PgScriptStore, class_name: &str) -> ScriptInstance {
    store.create_instance(&new_instance(class_name)).await.unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn health_check_passes(pool: PgPool) {
    scriptmgr_db::health_check(&pool).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn instance_round_trip_and_uniqueness(pool: PgPool) {
    let store = PgScriptStore::new(pool);
    let created = instance(&store, "CreateVlan").await;
    assert_eq!(created.task_queues, vec!["default", "high"]);
    assert_eq!(created.group.as_deref(), Some("IPAM"));

    let found = store
        .find_instance("customscripts.vlans", "CreateVlan")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, created);

    let err = store.create_instance(&new_instance("CreateVlan")).await.unwrap_err();
    assert_matches!(err, CoreError::Validation(msg) if msg.contains("already exists"));
}

#[sqlx::test(migrations = "./migrations")]
async fn execution_state_is_persisted(pool: PgPool) {
    let store = PgScriptStore::new(pool);
    let inst = instance(&store, "CreateVlan").await;
    let at = Utc::now() + Duration::hours(1);

    let mut execution = store
        .create_execution(
            &NewScriptExecution::new(inst.id, Actor::new(Some(4), "jdoe"), "high", json!({"vid": 5}))
                .scheduled_at(at)
                .interval(15),
        )
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Scheduled);
    assert_eq!(execution.interval, Some(15));
    assert_eq!(execution.actor.name, "jdoe");

    execution.start().unwrap();
    execution.data.output = Some("ok".into());
    execution.terminate(ExecutionStatus::Completed).unwrap();
    store.save_execution(&execution).await.unwrap();

    let stored = store.get_execution(execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.data.input, json!({"vid": 5}));
    assert_eq!(stored.data.output.as_deref(), Some("ok"));
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn oversized_interval_is_refused(pool: PgPool) {
    let store = PgScriptStore::new(pool);
    let inst = instance(&store, "CreateVlan").await;
    let new = NewScriptExecution::new(inst.id, Actor::default(), "default", json!({}))
        .scheduled_at(Utc::now() + Duration::hours(1))
        .interval(MAX_INTERVAL_MINUTES + 1);

    let err = store.create_execution(&new).await.unwrap_err();
    assert_matches!(err, CoreError::Validation(_));
    assert!(store.list_executions(inst.id).await.unwrap().is_empty());

    let longest = store
        .create_execution(&new.clone().interval(MAX_INTERVAL_MINUTES))
        .await
        .unwrap();
    assert_eq!(longest.interval, Some(MAX_INTERVAL_MINUTES));
}

#[sqlx::test(migrations = "./migrations")]
async fn execution_requires_an_instance(pool: PgPool) {
    let store = PgScriptStore::new(pool);
    let err = store
        .create_execution(&NewScriptExecution::new(404, Actor::system(), "default", json!({})))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::NotFound { id: 404, .. });
}

#[sqlx::test(migrations = "./migrations")]
async fn deleting_an_instance_cascades(pool: PgPool) {
    let store = PgScriptStore::new(pool.clone());
    let sink = PgLogSink::new(pool);
    let inst = instance(&store, "CreateVlan").await;

    let first = store
        .create_execution(&NewScriptExecution::new(inst.id, Actor::system(), "default", json!({})))
        .await
        .unwrap();
    let second = store
        .create_execution(&NewScriptExecution::new(inst.id, Actor::system(), "default", json!({})))
        .await
        .unwrap();
    sink.append_log(first.id, LogLevel::Info, "hello").await.unwrap();

    let listed = store.list_executions(inst.id).await.unwrap();
    assert_eq!(
        listed.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );

    assert!(store.delete_instance(inst.id).await.unwrap());
    assert!(store.get_execution(first.id).await.unwrap().is_none());
    assert!(sink.list_logs(first.id).await.unwrap().is_empty());
    assert!(!store.delete_instance(inst.id).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
async fn log_lines_and_artifacts(pool: PgPool) {
    let store = PgScriptStore::new(pool.clone());
    let sink = PgLogSink::new(pool);
    let inst = instance(&store, "CreateVlan").await;
    let execution = store
        .create_execution(&NewScriptExecution::new(inst.id, Actor::system(), "default", json!({})))
        .await
        .unwrap();

    sink.append_log(execution.id, LogLevel::Warning, "first").await.unwrap();
    sink.append_log(execution.id, LogLevel::Success, "second").await.unwrap();
    let lines = sink.list_logs(execution.id).await.unwrap();
    assert_eq!(
        lines
            .iter()
            .map(|l| (l.level, l.message.as_str()))
            .collect::<Vec<_>>(),
        vec![(LogLevel::Warning, "first"), (LogLevel::Success, "second")]
    );

    sink.save_artifact(&NewScriptArtifact {
        script_execution_id: execution.id,
        name: "out.csv".into(),
        content_type: "text/csv".into(),
        data: b"a,b\n1,2\n".to_vec(),
    })
    .await
    .unwrap();
    let artifacts = sink.list_artifacts(execution.id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].data, b"a,b\n1,2\n");
}

#[sqlx::test(migrations = "./migrations")]
async fn script_transaction_rolls_back(pool: PgPool) {
    sqlx::query("CREATE TABLE vlans (vid INTEGER NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    let store = PgScriptStore::new(pool.clone());

    let mut tx = store.begin().await.unwrap();
    let pg = tx.as_any_mut().downcast_mut::<PgTransaction>().unwrap();
    sqlx::query("INSERT INTO vlans (vid) VALUES (10)")
        .execute(pg.connection())
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vlans")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
