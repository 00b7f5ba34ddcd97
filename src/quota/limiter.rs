//! Global and per-caller request budget shared across invocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::window::{RateWindow, WindowKind};
use crate::config::RateLimitConfig;
use crate::store::{self, DocumentStore, Mutation, RetryPolicy, StoreError};

const COUNTERS_KEY: &str = "rate-limit/counters";

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which ceiling denied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Global,
    Caller,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Global => f.write_str("global"),
            QuotaScope::Caller => f.write_str("caller"),
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration, scope: QuotaScope },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Stored counters document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counters {
    #[serde(default)]
    global: Option<RateWindow>,
    #[serde(default)]
    callers: BTreeMap<String, RateWindow>,
}

/// Check-and-increment against a global hour window and per-caller day windows
pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    cas_max_attempts: u32,
    enabled: bool,
    global_limit: u32,
    caller_limit: u32,
    bypass: HashSet<String>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: &RateLimitConfig,
        retry: RetryPolicy,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            retry,
            cas_max_attempts,
            enabled: config.enabled,
            global_limit: config.global_per_hour,
            caller_limit: config.per_caller_per_day,
            bypass: config.bypass.iter().cloned().collect(),
        }
    }

    pub fn is_bypassed(&self, caller: &str) -> bool {
        self.bypass.contains(caller)
    }

    pub async fn check_and_consume(&self, caller: &str) -> Result<Decision, QuotaError> {
        self.check_and_consume_at(caller, Utc::now()).await
    }

    /// Check both ceilings and charge both counters in one conditional write.
    /// A denial never writes.
    pub async fn check_and_consume_at(&self, caller: &str, now: DateTime<Utc>) -> Result<Decision, QuotaError> {
        if !self.enabled {
            return Ok(Decision::Allowed);
        }
        if self.is_bypassed(caller) {
            debug!(caller = %caller, "Caller is on the bypass list");
            return Ok(Decision::Allowed);
        }

        let decision = store::update(
            self.store.as_ref(),
            self.retry,
            COUNTERS_KEY,
            self.cas_max_attempts,
            |current: Option<Counters>| -> Result<Mutation<Counters, Decision>, QuotaError> {
                let mut counters = current.unwrap_or_default();

                let global_count = counters
                    .global
                    .map(|w| w.current(WindowKind::Hour, now))
                    .unwrap_or(0);
                if global_count >= self.global_limit {
                    return Ok(Mutation::Skip(Decision::Denied {
                        retry_after: Duration::from_secs(WindowKind::Hour.remaining_secs(now)),
                        scope: QuotaScope::Global,
                    }));
                }

                let caller_count = counters
                    .callers
                    .get(caller)
                    .map(|w| w.current(WindowKind::Day, now))
                    .unwrap_or(0);
                if caller_count >= self.caller_limit {
                    return Ok(Mutation::Skip(Decision::Denied {
                        retry_after: Duration::from_secs(WindowKind::Day.remaining_secs(now)),
                        scope: QuotaScope::Caller,
                    }));
                }

                counters.global = Some(RateWindow::charged(counters.global.as_ref(), WindowKind::Hour, now));
                let charged = RateWindow::charged(counters.callers.get(caller), WindowKind::Day, now);
                counters.callers.insert(caller.to_string(), charged);
                counters.callers.retain(|_, w| !w.is_expired(WindowKind::Day, now));

                Ok(Mutation::Write(counters, Decision::Allowed))
            },
        )
        .await?;

        match decision {
            Decision::Allowed => debug!(caller = %caller, "Quota check passed"),
            Decision::Denied { retry_after, scope } => warn!(
                caller = %caller,
                scope = %scope,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            ),
        }
        Ok(decision)
    }
}
