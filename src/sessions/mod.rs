//! Sessions: follow-up generations against models of an earlier job

pub mod manager;
pub mod session;

pub use manager::{IterationTicket, SessionError, SessionManager};
pub use session::{Iteration, IterationStatus, ModelColumn, Session};
