//! Jobs: one prompt fanned out across every enabled model

pub mod job;
pub mod manager;

pub use job::{derive_status, Job, JobStatus, ModelResult, PromptSpec, SlotError, SlotStatus, SlotUpdate};
pub use manager::{JobError, JobManager};
