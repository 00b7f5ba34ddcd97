//! HTTP middleware

pub mod correlation;
pub mod rate_limit;

pub use correlation::{CorrelationId, CorrelationLayer, CORRELATION_HEADER};
pub use rate_limit::BurstGuardLayer;
