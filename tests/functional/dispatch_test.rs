//! Functional tests for the parallel dispatch coordinator

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    build_app, build_app_with_store, model, test_settings, Behavior, OutageStore, ScriptedAdapter, TestApp,
};
use gen_fanout_engine::{
    backend::{ModelDescriptor, ProviderError, ProviderKind},
    jobs::{Job, JobStatus, PromptSpec, SlotStatus},
    store::MemoryDocumentStore,
};

async fn start(app: &TestApp, prompt: &str) -> Job {
    let models = app.state.registry.list_enabled();
    let job = app.state.jobs.create(PromptSpec::new(prompt), models).await.unwrap();
    app.state.coordinator.dispatch(&job, models);
    job
}

async fn wait_terminal(app: &TestApp, job_id: &str) -> Job {
    for _ in 0..200 {
        let job = app.state.jobs.get_status(job_id).await.unwrap();
        if job.status().is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} never finished", job_id);
}

fn statuses(job: &Job) -> Vec<SlotStatus> {
    job.results.iter().map(|r| r.status).collect()
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out_without_delaying_others() {
    let adapter = ScriptedAdapter::new()
        .on("model-a", Behavior::Succeed { after: Duration::from_secs(2) })
        .on("model-b", Behavior::Hang)
        .on("model-c", Behavior::Succeed { after: Duration::from_secs(4) });
    let app = build_app(
        test_settings(30),
        vec![model("Model A"), model("Model B"), model("Model C")],
        adapter,
    );

    let job = start(&app, "a red bicycle").await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let progress = app.state.jobs.get_status(&job.id).await.unwrap();
    assert_eq!(progress.status(), JobStatus::InProgress);
    assert_eq!(
        statuses(&progress),
        [SlotStatus::Success, SlotStatus::InProgress, SlotStatus::Success]
    );
    assert_eq!(progress.completed_models(), 2);

    tokio::time::sleep(Duration::from_secs(21)).await;
    let done = app.state.jobs.get_status(&job.id).await.unwrap();
    assert_eq!(done.status(), JobStatus::Partial);
    assert_eq!(done.completed_models(), 3);

    let slow = &done.results[1];
    assert_eq!(slow.status, SlotStatus::Error);
    assert_eq!(slow.error.as_ref().unwrap().code, "PROVIDER_TIMEOUT");
    assert!(slow.image_ref.is_none());
    assert!(slow.completed_at.is_some());

    for slot in [&done.results[0], &done.results[2]] {
        let key = slot.image_ref.as_deref().unwrap();
        assert!(key.starts_with(&format!("group-images/{}/", job.id)));
        assert!(key.ends_with(".png"));
        assert!(app.images.contains(key));
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_stay_in_their_slot() {
    let adapter = ScriptedAdapter::new()
        .on(
            "vendor-error",
            Behavior::Fail(ProviderError::Vendor {
                status: 400,
                message: "content policy, api_key=leaked123".to_string(),
            }),
        )
        .on("exploding", Behavior::Panic)
        .on("garbage", Behavior::Garbage);

    let mut models = vec![
        model("Healthy"),
        model("Vendor Error"),
        model("Exploding"),
        model("Garbage"),
    ];
    models.push(ModelDescriptor {
        credential_ref: Some("ABSENT_KEY".to_string()),
        ..model("Needs Key")
    });
    models.push(ModelDescriptor {
        provider: ProviderKind::Recraft,
        ..model("Recraft v3")
    });

    let app = build_app(test_settings(30), models, adapter);
    let job = start(&app, "a quiet harbor").await;
    let done = wait_terminal(&app, &job.id).await;

    assert_eq!(done.status(), JobStatus::Partial);
    assert_eq!(done.results[0].status, SlotStatus::Success);

    let codes: Vec<&str> = done.results[1..]
        .iter()
        .map(|r| r.error.as_ref().unwrap().code.as_str())
        .collect();
    assert_eq!(
        codes,
        [
            "PROVIDER_ERROR",
            "PROVIDER_PANICKED",
            "MALFORMED_RESPONSE",
            "MISSING_CREDENTIAL",
            "PROVIDER_UNSUPPORTED"
        ]
    );

    let vendor = done.results[1].error.as_ref().unwrap();
    assert!(!vendor.message.contains("leaked123"));

    // Dispatch-time failures never start
    assert!(done.results[4].started_at.is_none());
    assert!(done.results[5].started_at.is_none());

    // Only reachable adapters were called
    let called: Vec<String> = app.adapter.calls().into_iter().map(|c| c.target_id).collect();
    assert!(!called.contains(&"needs-key".to_string()));
    assert!(!called.contains(&"recraft-v3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_all_failures_make_a_failed_job() {
    let adapter = ScriptedAdapter::new()
        .on("a", Behavior::Fail(ProviderError::Connection("refused".into())))
        .on("b", Behavior::Hang);
    let app = build_app(test_settings(5), vec![model("A"), model("B")], adapter);

    let job = start(&app, "night sky").await;
    let done = wait_terminal(&app, &job.id).await;

    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.results[0].error.as_ref().unwrap().code, "PROVIDER_UNREACHABLE");
    assert_eq!(done.results[1].error.as_ref().unwrap().code, "PROVIDER_TIMEOUT");
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_queues_calls() {
    let adapter = ScriptedAdapter::new()
        .on("a", Behavior::Succeed { after: Duration::from_secs(10) })
        .on("b", Behavior::Succeed { after: Duration::from_secs(10) })
        .on("c", Behavior::Succeed { after: Duration::from_secs(10) });
    let mut settings = test_settings(120);
    settings.dispatch.max_concurrent_calls = 1;
    let app = build_app(settings, vec![model("A"), model("B"), model("C")], adapter);

    let job = start(&app, "three calls").await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    let progress = app.state.jobs.get_status(&job.id).await.unwrap();
    assert_eq!(progress.completed_models(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(app.state.jobs.get_status(&job.id).await.unwrap().completed_models(), 2);

    let done = wait_terminal(&app, &job.id).await;
    assert_eq!(done.status(), JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_in_flight_calls() {
    let adapter = ScriptedAdapter::new()
        .on("a", Behavior::Hang)
        .on("b", Behavior::Hang);
    let app = build_app(test_settings(600), vec![model("A"), model("B")], adapter);

    let job = start(&app, "never finishes").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        statuses(&app.state.jobs.get_status(&job.id).await.unwrap()),
        [SlotStatus::InProgress, SlotStatus::InProgress]
    );

    app.state.coordinator.shutdown().await;

    let done = app.state.jobs.get_status(&job.id).await.unwrap();
    assert_eq!(done.status(), JobStatus::Failed);
    for slot in &done.results {
        assert_eq!(slot.error.as_ref().unwrap().code, "DISPATCH_CANCELLED");
    }
}

#[tokio::test(start_paused = true)]
async fn test_outcome_is_recorded_after_store_outage() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let store = Arc::new(OutageStore::new(documents.clone(), "jobs/"));
    let adapter = ScriptedAdapter::new().on("a", Behavior::Succeed { after: Duration::from_secs(1) });
    let app = build_app_with_store(test_settings(30), vec![model("A")], adapter, store.clone(), documents);

    let job = start(&app, "a red bicycle").await;

    // Store goes away while the provider is working and stays down past the inner retries
    tokio::time::sleep(Duration::from_millis(500)).await;
    store.set_down(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    store.set_down(false);

    let done = wait_terminal(&app, &job.id).await;
    assert_eq!(done.status(), JobStatus::Completed);
    let key = done.results[0].image_ref.as_deref().unwrap();
    assert!(app.images.contains(key));
}

#[tokio::test(start_paused = true)]
async fn test_unrecordable_start_still_ends_terminal() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let store = Arc::new(OutageStore::new(documents.clone(), "jobs/"));
    let mut settings = test_settings(30);
    settings.dispatch.outcome_retry_attempts = 1;
    settings.dispatch.outcome_retry_base_delay_ms = 300;
    settings.dispatch.outcome_retry_max_delay_ms = 300;
    let app = build_app_with_store(settings, vec![model("A")], ScriptedAdapter::new(), store.clone(), documents);

    // Job exists, then the store drops before the slot can start
    let models = app.state.registry.list_enabled();
    let job = app.state.jobs.create(PromptSpec::new("a red bicycle"), models).await.unwrap();
    store.set_down(true);
    app.state.coordinator.dispatch(&job, models);

    // Start and its failure write both give up; the store is back before the final sweep
    tokio::time::sleep(Duration::from_millis(1150)).await;
    store.set_down(false);

    let done = wait_terminal(&app, &job.id).await;
    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.results[0].error.as_ref().unwrap().code, "STORAGE_ERROR");
    assert!(app.adapter.calls().is_empty());
}
