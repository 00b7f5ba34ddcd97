//! Functional tests for the quota limiter and the burst guard

#[path = "../common/mod.rs"]
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::FlakyStore;
use gen_fanout_engine::{
    config::RateLimitConfig,
    middleware::BurstGuardLayer,
    quota::{Decision, QuotaScope, RateLimiter},
    store::{DocumentStore, MemoryDocumentStore, RetryPolicy},
};

fn config(global: u32, per_caller: u32, bypass: &[&str]) -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        global_per_hour: global,
        per_caller_per_day: per_caller,
        bypass: bypass.iter().map(|s| s.to_string()).collect(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_ceiling_never_overshoots() {
    const GLOBAL: u32 = 25;

    let store = Arc::new(MemoryDocumentStore::new());
    let limiter = Arc::new(RateLimiter::new(store.clone(), &config(GLOBAL, 10, &[]), fast_retry(), 256));

    let handles: Vec<_> = (0..=GLOBAL)
        .map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_and_consume(&format!("caller-{}", i)).await.unwrap() })
        })
        .collect();

    let mut denied = Vec::new();
    for handle in handles {
        let decision = handle.await.unwrap();
        if let Decision::Denied { scope, .. } = decision {
            denied.push(scope);
        }
    }

    assert_eq!(denied, [QuotaScope::Global]);

    // The denial was not charged
    let doc = store.get("rate-limit/counters").await.unwrap().unwrap();
    assert_eq!(doc.body["global"]["count"], GLOBAL);
}

#[tokio::test]
async fn test_denial_arrives_at_request_g_plus_one() {
    let limiter = RateLimiter::new(Arc::new(MemoryDocumentStore::new()), &config(3, 10, &[]), RetryPolicy::none(), 8);
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 14, 59, 30).unwrap();

    for i in 0..3 {
        assert!(limiter.check_and_consume_at(&format!("c{}", i), now).await.unwrap().is_allowed());
    }
    match limiter.check_and_consume_at("c3", now).await.unwrap() {
        Decision::Denied { retry_after, scope } => {
            assert_eq!(scope, QuotaScope::Global);
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        Decision::Allowed => panic!("fourth request should be denied"),
    }

    // Next hour window starts fresh
    let next_hour = Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap();
    assert!(limiter.check_and_consume_at("c3", next_hour).await.unwrap().is_allowed());
}

#[tokio::test]
async fn test_per_caller_ceiling() {
    let limiter = RateLimiter::new(Arc::new(MemoryDocumentStore::new()), &config(100, 2, &[]), RetryPolicy::none(), 8);
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();

    assert!(limiter.check_and_consume_at("alice", now).await.unwrap().is_allowed());
    assert!(limiter.check_and_consume_at("alice", now).await.unwrap().is_allowed());

    let denied = limiter.check_and_consume_at("alice", now).await.unwrap();
    assert_eq!(
        denied,
        Decision::Denied {
            retry_after: Duration::from_secs(3600),
            scope: QuotaScope::Caller
        }
    );

    // Other callers are unaffected
    assert!(limiter.check_and_consume_at("bob", now).await.unwrap().is_allowed());
}

#[tokio::test]
async fn test_bypassed_caller_never_touches_the_store() {
    const PER_CALLER: u32 = 3;

    let store = Arc::new(MemoryDocumentStore::new());
    let limiter = RateLimiter::new(
        store.clone(),
        &config(1, PER_CALLER, &["10.0.0.1"]),
        RetryPolicy::none(),
        8,
    );

    for _ in 0..PER_CALLER + 5 {
        assert!(limiter.check_and_consume("10.0.0.1").await.unwrap().is_allowed());
    }
    assert!(store.get("rate-limit/counters").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_is_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let limiter = RateLimiter::new(store, &config(10, 10, &[]), fast_retry(), 8);

    assert!(limiter.check_and_consume("carol").await.unwrap().is_allowed());
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_surfaces_after_retries() {
    let store = Arc::new(FlakyStore::new(50));
    let limiter = RateLimiter::new(store, &config(10, 10, &[]), fast_retry(), 8);

    assert!(limiter.check_and_consume("carol").await.is_err());
}

fn guarded(per_second: u32, burst: u32) -> Router {
    Router::new()
        .route("/health", axum::routing::get(|| async { "healthy" }))
        .route("/generate", axum::routing::post(|| async { "OK" }))
        .layer(BurstGuardLayer::new(per_second, burst))
}

fn post_generate() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_burst_guard_rejects_floods() {
    let app = guarded(1, 2);

    assert_eq!(app.clone().oneshot(post_generate()).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.clone().oneshot(post_generate()).await.unwrap().status(), StatusCode::OK);

    let response = app.clone().oneshot(post_generate()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_burst_guard_skips_health() {
    let app = guarded(1, 1);
    assert_eq!(app.clone().oneshot(post_generate()).await.unwrap().status(), StatusCode::OK);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
