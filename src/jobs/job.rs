//! Job records and the per-slot state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::backend::registry::ModelDescriptor;

/// Prompt text plus generation parameters, immutable once a job exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<f32>,
}

impl PromptSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            steps: None,
            guidance: None,
            control: None,
        }
    }
}

/// State of one model slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

impl SlotStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SlotStatus::Success | SlotStatus::Error)
    }

    /// Legal edges: pending -> in_progress -> {success, error}, and pending -> error
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        matches!(
            (self, next),
            (SlotStatus::Pending, SlotStatus::InProgress)
                | (SlotStatus::Pending, SlotStatus::Error)
                | (SlotStatus::InProgress, SlotStatus::Success)
                | (SlotStatus::InProgress, SlotStatus::Error)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Pending => "pending",
            SlotStatus::InProgress => "in_progress",
            SlotStatus::Success => "success",
            SlotStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Job-level status, always derived from the slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Partial | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Short code plus human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotError {
    pub code: String,
    pub message: String,
}

impl SlotError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome record for one model at a fixed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResult {
    pub index: usize,
    /// Display name copied at dispatch time
    pub model: String,
    pub status: SlotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SlotError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A progress report for one slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotUpdate {
    Started,
    Succeeded { image_ref: String },
    Failed { error: SlotError },
}

impl SlotUpdate {
    pub fn target(&self) -> SlotStatus {
        match self {
            SlotUpdate::Started => SlotStatus::InProgress,
            SlotUpdate::Succeeded { .. } => SlotStatus::Success,
            SlotUpdate::Failed { .. } => SlotStatus::Error,
        }
    }
}

impl ModelResult {
    fn pending(index: usize, model: String) -> Self {
        Self {
            index,
            model,
            status: SlotStatus::Pending,
            image_ref: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply an update if it is a legal edge. Returns the rejected edge otherwise.
    pub fn apply(&mut self, update: SlotUpdate, now: DateTime<Utc>) -> Result<(), (SlotStatus, SlotStatus)> {
        let next = update.target();
        if !self.status.can_transition_to(next) {
            return Err((self.status, next));
        }

        match update {
            SlotUpdate::Started => {
                self.started_at = Some(now);
            }
            SlotUpdate::Succeeded { image_ref } => {
                self.image_ref = Some(image_ref);
                self.completed_at = Some(now);
            }
            SlotUpdate::Failed { error } => {
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.status = next;
        Ok(())
    }
}

/// One prompt fanned out across every enabled model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub prompt: PromptSpec,
    pub created_at: DateTime<Utc>,
    pub total_models: usize,
    pub results: Vec<ModelResult>,
}

impl Job {
    /// Fresh job with one pending slot per model, in registry order
    pub fn new(prompt: PromptSpec, models: &[ModelDescriptor]) -> Self {
        let results: Vec<ModelResult> = models
            .iter()
            .enumerate()
            .map(|(index, model)| ModelResult::pending(index, model.name.clone()))
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            created_at: Utc::now(),
            total_models: results.len(),
            results,
        }
    }

    /// Aggregate status, recomputed from the slots on every call
    pub fn status(&self) -> JobStatus {
        derive_status(self.results.iter().map(|r| r.status))
    }

    /// Slots that reached a terminal state
    pub fn completed_models(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_terminal()).count()
    }

    pub fn slot(&self, index: usize) -> Option<&ModelResult> {
        self.results.get(index)
    }

    /// Slot for a model display name
    pub fn slot_for_model(&self, model: &str) -> Option<&ModelResult> {
        self.results.iter().find(|r| r.model == model)
    }
}

/// Pure function from slot states to the aggregate status
pub fn derive_status<I>(slots: I) -> JobStatus
where
    I: IntoIterator<Item = SlotStatus>,
{
    let mut total = 0usize;
    let mut pending = 0usize;
    let mut in_progress = 0usize;
    let mut success = 0usize;

    for status in slots {
        total += 1;
        match status {
            SlotStatus::Pending => pending += 1,
            SlotStatus::InProgress => in_progress += 1,
            SlotStatus::Success => success += 1,
            SlotStatus::Error => {}
        }
    }

    if pending == total {
        JobStatus::Pending
    } else if pending > 0 || in_progress > 0 {
        JobStatus::InProgress
    } else if success == total {
        JobStatus::Completed
    } else if success > 0 {
        JobStatus::Partial
    } else {
        JobStatus::Failed
    }
}
