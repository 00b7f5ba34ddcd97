//! Fixed wall-clock counting windows

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Window length a counter is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Hour,
    Day,
}

impl WindowKind {
    pub fn length(self) -> Duration {
        match self {
            WindowKind::Hour => Duration::hours(1),
            WindowKind::Day => Duration::days(1),
        }
    }

    /// Start of the window containing `now`
    pub fn start_of(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(self.length()).unwrap_or(now)
    }

    /// Time left until the window containing `now` ends, whole seconds, at least 1
    pub fn remaining_secs(self, now: DateTime<Utc>) -> u64 {
        let end = self.start_of(now) + self.length();
        let millis = (end - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// A (count, windowStart) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

impl RateWindow {
    /// Count that applies at `now`; an expired window counts as empty
    pub fn current(&self, kind: WindowKind, now: DateTime<Utc>) -> u32 {
        if self.window_start == kind.start_of(now) {
            self.count
        } else {
            0
        }
    }

    pub fn is_expired(&self, kind: WindowKind, now: DateTime<Utc>) -> bool {
        self.window_start != kind.start_of(now)
    }

    /// Window rebased to `now` holding one more request
    pub fn charged(existing: Option<&RateWindow>, kind: WindowKind, now: DateTime<Utc>) -> RateWindow {
        let count = existing.map(|w| w.current(kind, now)).unwrap_or(0);
        RateWindow {
            count: count.saturating_add(1),
            window_start: kind.start_of(now),
        }
    }
}
