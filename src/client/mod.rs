//! Client-side helpers for consuming the job API

pub mod poller;

pub use poller::{JobPoller, JobSnapshot, PollError, PollerConfig, SlotSnapshot};
