//! Request quotas: a global hourly ceiling and a per-caller daily ceiling

pub mod limiter;
pub mod window;

pub use limiter::{Decision, QuotaError, QuotaScope, RateLimiter};
pub use window::{RateWindow, WindowKind};
