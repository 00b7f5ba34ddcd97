//! Functional tests for the status poller against a mock server

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use gen_fanout_engine::{
    client::{JobPoller, PollError, PollerConfig},
    jobs::JobStatus,
};

fn fast_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(10),
        max_retries: 3,
        base_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        ceiling: Duration::from_secs(10),
    }
}

fn snapshot(status: &str, completed: usize) -> Value {
    json!({
        "jobId": "job-1",
        "status": status,
        "totalModels": 2,
        "completedModels": completed,
        "createdAt": "2026-03-01T12:00:00Z",
        "prompt": "a red bicycle",
        "results": [
            {"index": 0, "model": "DALL-E 3", "status": if completed > 0 { "success" } else { "in_progress" }},
            {"index": 1, "model": "Flux Pro", "status": if completed > 1 { "error" } else { "in_progress" },
             "error": if completed > 1 { json!({"code": "PROVIDER_TIMEOUT", "message": "timed out"}) } else { Value::Null }}
        ]
    })
}

#[tokio::test]
async fn test_polls_until_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("in_progress", 0)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("in_progress", 1)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("partial", 2)))
        .mount(&server)
        .await;

    let poller = JobPoller::new(server.uri(), fast_config()).unwrap();
    let mut seen = Vec::new();
    let done = poller
        .poll_until_done("job-1", |s| seen.push((s.status, s.completed_models)))
        .await
        .unwrap();

    assert_eq!(
        seen,
        [
            (JobStatus::InProgress, 0),
            (JobStatus::InProgress, 1),
            (JobStatus::Partial, 2)
        ]
    );
    assert_eq!(done.status, JobStatus::Partial);
    assert_eq!(done.results[1].error.as_ref().unwrap().code, "PROVIDER_TIMEOUT");
}

#[tokio::test]
async fn test_transient_failures_back_off_and_recover() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("completed", 2)))
        .mount(&server)
        .await;

    let poller = JobPoller::new(server.uri(), fast_config()).unwrap();
    let done = poller.poll_until_done("job-1", |_| {}).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let poller = JobPoller::new(server.uri(), fast_config()).unwrap();
    let err = poller.poll_until_done("job-1", |_| {}).await.unwrap_err();
    assert!(matches!(err, PollError::RetriesExhausted { attempts: 4, .. }));
}

#[tokio::test]
async fn test_not_found_stops_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "JOB_NOT_FOUND"})))
        .expect(1)
        .mount(&server)
        .await;

    let poller = JobPoller::new(server.uri(), fast_config()).unwrap();
    let err = poller.poll_until_done("gone", |_| {}).await.unwrap_err();
    assert!(matches!(err, PollError::NotFound(id) if id == "gone"));
}

#[tokio::test]
async fn test_ceiling_stops_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot("in_progress", 0)))
        .mount(&server)
        .await;

    let config = PollerConfig {
        interval: Duration::from_millis(20),
        ceiling: Duration::from_millis(100),
        ..fast_config()
    };
    let poller = JobPoller::new(server.uri(), config).unwrap();

    let mut polls = 0;
    let err = poller.poll_until_done("job-1", |_| polls += 1).await.unwrap_err();
    assert!(matches!(
        err,
        PollError::CeilingReached {
            status: JobStatus::InProgress,
            ..
        }
    ));
    assert!(polls >= 2);
}
