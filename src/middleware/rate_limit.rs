//! In-process burst guard using the Governor crate
//!
//! Sits in front of every handler and sheds request floods before they reach the
//! quota store. The per-caller and global budgets live in [`crate::quota`].

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Serialize;
use std::{
    num::NonZeroU32,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

const FALLBACK_PER_SECOND: NonZeroU32 = match NonZeroU32::new(50) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

#[derive(Serialize)]
struct BurstRejected {
    error: &'static str,
    message: &'static str,
}

type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>;

#[derive(Clone)]
pub struct BurstGuardLayer {
    limiter: SharedLimiter,
}

impl BurstGuardLayer {
    /// Zero values fall back to 50 per second and a burst equal to the rate
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(FALLBACK_PER_SECOND);
        let burst = NonZeroU32::new(burst_size).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl<S> Layer<S> for BurstGuardLayer {
    type Service = BurstGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BurstGuard {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BurstGuard<S> {
    inner: S,
    limiter: SharedLimiter,
}

impl<S> Service<Request<Body>> for BurstGuard<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if request.uri().path() == "/health" || self.limiter.check().is_ok() {
            let future = self.inner.call(request);
            return Box::pin(future);
        }

        warn!(path = %request.uri().path(), "Burst limit exceeded");
        Box::pin(async move { Ok(rejected()) })
    }
}

fn rejected() -> Response {
    let body = BurstRejected {
        error: "RATE_LIMIT_EXCEEDED",
        message: "Too many requests. Please slow down.",
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}
