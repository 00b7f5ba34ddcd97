//! Unit tests for the slot state machine and aggregate status

use std::sync::Arc;

use gen_fanout_engine::{
    backend::{ModelDescriptor, ProviderKind},
    jobs::{derive_status, Job, JobError, JobManager, JobStatus, PromptSpec, SlotError, SlotStatus, SlotUpdate},
    store::{MemoryDocumentStore, RetryPolicy},
};

fn models(names: &[&str]) -> Vec<ModelDescriptor> {
    names
        .iter()
        .map(|name| ModelDescriptor {
            name: name.to_string(),
            provider: ProviderKind::Compatible,
            target_id: name.to_lowercase(),
            credential_ref: None,
            endpoint: None,
        })
        .collect()
}

fn manager() -> JobManager {
    JobManager::new(Arc::new(MemoryDocumentStore::new()), RetryPolicy::none(), 16)
}

#[test]
fn test_derive_status_table() {
    use SlotStatus::*;

    assert_eq!(derive_status([Pending, Pending]), JobStatus::Pending);
    assert_eq!(derive_status([Pending, InProgress]), JobStatus::InProgress);
    assert_eq!(derive_status([Success, Pending]), JobStatus::InProgress);
    assert_eq!(derive_status([Success, Success]), JobStatus::Completed);
    assert_eq!(derive_status([Success, Error]), JobStatus::Partial);
    assert_eq!(derive_status([Error, Error]), JobStatus::Failed);
}

#[test]
fn test_only_legal_edges() {
    use SlotStatus::*;

    assert!(Pending.can_transition_to(InProgress));
    assert!(Pending.can_transition_to(Error));
    assert!(InProgress.can_transition_to(Success));
    assert!(InProgress.can_transition_to(Error));

    assert!(!Pending.can_transition_to(Success));
    assert!(!Success.can_transition_to(Error));
    assert!(!Error.can_transition_to(InProgress));
    assert!(!InProgress.can_transition_to(Pending));
}

#[test]
fn test_new_job_is_all_pending() {
    let job = Job::new(PromptSpec::new("a lighthouse"), &models(&["A", "B", "C"]));

    assert_eq!(job.total_models, 3);
    assert_eq!(job.results.len(), 3);
    assert!(job.results.iter().all(|r| r.status == SlotStatus::Pending));
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(job.completed_models(), 0);
    assert_eq!(job.results[2].index, 2);
    assert_eq!(job.results[1].model, "B");
}

#[test]
fn test_status_is_not_stored() {
    let job = Job::new(PromptSpec::new("a lighthouse"), &models(&["A"]));
    let value = serde_json::to_value(&job).unwrap();

    assert!(value.get("status").is_none());
    assert_eq!(value["totalModels"], 1);
}

#[tokio::test]
async fn test_status_rederives_from_snapshot() {
    let jobs = manager();
    let job = jobs.create(PromptSpec::new("fog"), &models(&["A", "B"])).await.unwrap();

    jobs.record_progress(&job.id, 0, SlotUpdate::Started).await.unwrap();
    jobs.record_progress(
        &job.id,
        0,
        SlotUpdate::Succeeded {
            image_ref: "group-images/x/a-0.png".into(),
        },
    )
    .await
    .unwrap();
    jobs.record_progress(
        &job.id,
        1,
        SlotUpdate::Failed {
            error: SlotError::new("PROVIDER_TIMEOUT", "timed out"),
        },
    )
    .await
    .unwrap();

    let snapshot = jobs.get_status(&job.id).await.unwrap();
    assert_eq!(snapshot.status(), JobStatus::Partial);
    assert_eq!(derive_status(snapshot.results.iter().map(|r| r.status)), snapshot.status());
    assert_eq!(snapshot.completed_models(), 2);
}

#[tokio::test]
async fn test_get_status_is_idempotent() {
    let jobs = manager();
    let job = jobs.create(PromptSpec::new("fog"), &models(&["A", "B"])).await.unwrap();
    jobs.record_progress(&job.id, 1, SlotUpdate::Started).await.unwrap();

    let first = jobs.get_status(&job.id).await.unwrap();
    let second = jobs.get_status(&job.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status(), second.status());
}

#[tokio::test]
async fn test_terminal_slot_cannot_be_rewritten() {
    let jobs = manager();
    let job = jobs.create(PromptSpec::new("fog"), &models(&["A"])).await.unwrap();

    jobs.record_progress(&job.id, 0, SlotUpdate::Started).await.unwrap();
    let done = jobs
        .record_progress(&job.id, 0, SlotUpdate::Succeeded { image_ref: "k.png".into() })
        .await
        .unwrap();
    let completed_at = done.results[0].completed_at;
    assert!(completed_at.is_some());

    let err = jobs
        .record_progress(
            &job.id,
            0,
            SlotUpdate::Failed {
                error: SlotError::new("PROVIDER_ERROR", "late"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::IllegalTransition {
            from: SlotStatus::Success,
            to: SlotStatus::Error,
            ..
        }
    ));

    let after = jobs.get_status(&job.id).await.unwrap();
    assert_eq!(after.results[0].status, SlotStatus::Success);
    assert_eq!(after.results[0].completed_at, completed_at);
    assert!(after.results[0].error.is_none());
}

#[tokio::test]
async fn test_unknown_job() {
    let jobs = manager();
    assert!(matches!(jobs.get_status("nope").await, Err(JobError::NotFound(_))));
}
