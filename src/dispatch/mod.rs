//! Dispatch: concurrent provider calls feeding the job manager

pub mod coordinator;

pub use coordinator::{DispatchCoordinator, DispatchDeps, DISPATCH_CANCELLED, STORAGE_ERROR};
