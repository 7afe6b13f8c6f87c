mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

use common::{native, Harness, WriteRecord};
use scriptmgr_core::params::{ParamSchema, ParamSpec, ParamType};
use scriptmgr_core::registry::LoadError;
use scriptmgr_core::status::ExecutionStatus;
use scriptmgr_core::store::ScriptStore;
use scriptmgr_core::types::Actor;
use scriptmgr_core::{CoreError, ScriptMetadata, SubmitRequest};

fn vlan_params() -> ParamSchema {
    ParamSchema(vec![
        ParamSpec::new(
            "vid",
            ParamType::Integer {
                min_value: Some(1),
                max_value: Some(4094),
            },
        ),
        ParamSpec::new("tagged", ParamType::Boolean),
    ])
}

fn request(data: Value) -> SubmitRequest {
    SubmitRequest {
        data: data.as_object().cloned().unwrap_or_else(Map::new),
        ..SubmitRequest::default()
    }
}

fn validation_message(err: CoreError) -> String {
    match err {
        CoreError::Validation(message) => message,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_scripts_creates_missing_instances_once() {
    let h = Harness::new();
    h.registry
        .register_native(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()));

    let first = h.manager.load_scripts().await.unwrap();
    assert_eq!(first.loaded, vec!["customscripts.tests.CreateVlan".to_string()]);
    assert!(first.failed.is_empty());

    let second = h.manager.load_scripts().await.unwrap();
    assert!(second.loaded.is_empty());
    assert_eq!(h.manager.instances().await.unwrap().len(), 1);
}

#[tokio::test]
async fn broken_module_does_not_block_the_others() {
    let h = Harness::new();
    h.write_entrypoint("hello.sh", "echo hello\n");
    h.write_module(
        "good",
        r#"
[scripts.Hello]
runtime = "shell"
entrypoint = "hello.sh"
"#,
    );
    h.write_module("broken", "[scripts.Oops\nruntime = ");

    let report = h.manager.load_scripts().await.unwrap();

    assert_eq!(report.loaded, vec!["customscripts.good.Hello".to_string()]);
    assert_matches!(report.failed.get("customscripts.broken"), Some(LoadError::Parse { .. }));

    let instance = h
        .store
        .find_instance("customscripts.good", "Hello")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.name, "Hello");
}

#[tokio::test]
async fn scripts_are_reloaded_from_disk() {
    let h = Harness::new();
    h.write_entrypoint("hello.sh", "echo hello\n");
    h.write_module(
        "good",
        r#"
[scripts.Hello]
runtime = "shell"
entrypoint = "hello.sh"
description = "first"
"#,
    );
    h.manager.load_scripts().await.unwrap();
    let before = h.registry.load("customscripts.good", "Hello").await.unwrap();
    assert_eq!(before.metadata.description, "first");

    h.write_module(
        "good",
        r#"
[scripts.Hello]
runtime = "shell"
entrypoint = "hello.sh"
description = "second"
"#,
    );
    let after = h.registry.load("customscripts.good", "Hello").await.unwrap();
    assert_eq!(after.metadata.description, "second");
}

#[tokio::test]
async fn module_broken_after_load_is_reported() {
    let h = Harness::new();
    h.write_entrypoint("hello.sh", "echo hello\n");
    h.write_module("good", "[scripts.Hello]\nruntime = \"shell\"\nentrypoint = \"hello.sh\"\n");
    let report = h.manager.load_scripts().await.unwrap();
    assert_eq!(report.loaded.len(), 1);

    h.write_module("good", "not toml at all [");
    let instance = h.manager.instances().await.unwrap().remove(0);
    let err = h
        .manager
        .submit(instance.id, &Actor::system(), request(json!({})))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::ModuleLoad { module, .. } if module == "customscripts.good");
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_queues_cleaned_input() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;

    let mut req = request(json!({
        "vid": "42",
        "csrfmiddlewaretoken": "abc",
        "_commit": "on",
        "_run": "1",
    }));
    req.commit = true;
    let execution = h
        .manager
        .submit(instance.id, &Actor::new(Some(3), "jdoe"), req)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Pending);
    assert_eq!(execution.task_queue, "default");
    assert_eq!(execution.data.input, json!({"vid": 42, "tagged": false}));

    let queued = h.queue.jobs();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].run_at, None);
    assert_eq!(queued[0].job.job_id, execution.task_id);
    assert_eq!(queued[0].job.data, execution.data.input);
    assert!(queued[0].job.commit);

    // Drain the queue the way a worker would.
    for job in h.queue.take_due(Utc::now()) {
        let outcome = h.engine.run_job(&job).await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
    }
    assert_eq!(h.store.record("vlan"), Some(json!(42)));
}

#[tokio::test]
async fn submit_reports_field_errors() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;

    let missing = h
        .manager
        .submit(instance.id, &Actor::system(), request(json!({})))
        .await
        .unwrap_err();
    assert_eq!(validation_message(missing), "vid: This field is required.");

    let too_big = h
        .manager
        .submit(instance.id, &Actor::system(), request(json!({"vid": 5000})))
        .await
        .unwrap_err();
    assert_eq!(
        validation_message(too_big),
        "vid: Ensure this value is less than or equal to 4094."
    );
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn schedule_must_be_in_the_future() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;

    let mut req = request(json!({"vid": 1}));
    req.schedule_at = Some(Utc::now() - Duration::minutes(5));
    let err = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap_err();
    assert_eq!(validation_message(err), "Scheduled time must be in the future.");
}

#[tokio::test]
async fn scheduled_submit_is_delayed() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;
    let at = Utc::now() + Duration::hours(2);

    let mut req = request(json!({"vid": 1}));
    req.schedule_at = Some(at);
    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Scheduled);
    assert_eq!(execution.scheduled_at, Some(at));
    assert_eq!(h.queue.jobs()[0].run_at, Some(at));
    assert!(h.queue.take_due(Utc::now()).is_empty());
}

#[tokio::test]
async fn interval_without_schedule_starts_now() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;
    let before = Utc::now();

    let mut req = request(json!({"vid": 1}));
    req.interval = Some(60);
    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Scheduled);
    assert_eq!(execution.interval, Some(60));
    let at = execution.scheduled_at.unwrap();
    assert!(at >= before && at <= Utc::now());
    assert_eq!(h.queue.jobs()[0].job.interval, Some(60));
}

#[tokio::test]
async fn scheduling_can_be_disabled() {
    let h = Harness::new();
    let metadata = ScriptMetadata {
        scheduling_enabled: false,
        ..ScriptMetadata::default()
    };
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", metadata, vlan_params()))
        .await;

    let mut req = request(json!({"vid": 1}));
    req.interval = Some(10);
    let err = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Validation(_));

    let form = h.manager.form(instance.id, None).await.unwrap();
    assert!(form.field("_schedule_at").is_none());
    assert!(form.field("_commit").is_some());
}

#[tokio::test]
async fn task_queue_must_be_offered() {
    let h = Harness::new();
    let metadata = ScriptMetadata {
        task_queues: vec!["high".into(), "low".into()],
        ..ScriptMetadata::default()
    };
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", metadata, vlan_params()))
        .await;
    assert_eq!(h.manager.task_queues(&instance), vec!["high", "low"]);

    let mut req = request(json!({"vid": 1}));
    req.task_queue = Some("default".into());
    assert_matches!(
        h.manager.submit(instance.id, &Actor::system(), req).await,
        Err(CoreError::Validation(_))
    );

    let mut req = request(json!({"vid": 1}));
    req.task_queue = Some("low".into());
    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap();
    assert_eq!(execution.task_queue, "low");
    assert_eq!(h.queue.jobs()[0].job.queue, "low");

    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), request(json!({"vid": 2})))
        .await
        .unwrap();
    assert_eq!(execution.task_queue, "high");
}

#[tokio::test]
async fn rerun_form_is_prefilled() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;
    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), request(json!({"vid": 12, "tagged": "on"})))
        .await
        .unwrap();

    let form = h.manager.form(instance.id, Some(execution.id)).await.unwrap();
    assert_eq!(form.field("vid").unwrap().initial, Some(json!(12)));
    assert_eq!(form.field("tagged").unwrap().initial, Some(json!(true)));
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleting_an_execution_cancels_its_job() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;
    let mut req = request(json!({"vid": 1}));
    req.schedule_at = Some(Utc::now() + Duration::days(1));
    let execution = h
        .manager
        .submit(instance.id, &Actor::system(), req)
        .await
        .unwrap();
    assert_eq!(h.queue.jobs().len(), 1);

    assert!(h.manager.delete_execution(execution.id).await.unwrap());
    assert!(h.queue.jobs().is_empty());
    assert!(h.manager.execution(execution.id).await.unwrap().is_none());
    assert!(!h.manager.delete_execution(execution.id).await.unwrap());
}

#[tokio::test]
async fn deleting_an_instance_cancels_all_jobs() {
    let h = Harness::new();
    let instance = h
        .install(native::<WriteRecord>("CreateVlan", ScriptMetadata::default(), vlan_params()))
        .await;
    for vid in [1, 2, 3] {
        h.manager
            .submit(instance.id, &Actor::system(), request(json!({"vid": vid})))
            .await
            .unwrap();
    }
    assert_eq!(h.manager.executions(instance.id).await.unwrap().len(), 3);

    assert!(h.manager.delete_instance(instance.id).await.unwrap());
    assert!(h.queue.jobs().is_empty());
    assert!(h.manager.executions(instance.id).await.unwrap().is_empty());
}
