//! Session records: one column of iterations per model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::jobs::SlotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IterationStatus::InProgress => "in_progress",
            IterationStatus::Completed => "completed",
            IterationStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One follow-up generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub index: u32,
    pub prompt: String,
    pub status: IterationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SlotError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Iterations of one model. The initial generation is iteration 0 and lives in the job slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelColumn {
    /// Slot of the initial generation in the job
    pub job_index: usize,
    #[serde(default)]
    pub iterations: Vec<Iteration>,
}

impl ModelColumn {
    /// Initial generation plus follow-ups
    pub fn iteration_count(&self) -> u32 {
        1 + self.iterations.len() as u32
    }

    pub fn next_index(&self) -> u32 {
        self.iterations.iter().map(|i| i.index).max().unwrap_or(0) + 1
    }

    /// Image of the most recent completed follow-up
    pub fn latest_image_ref(&self) -> Option<&str> {
        self.iterations
            .iter()
            .rev()
            .filter(|i| i.status == IterationStatus::Completed)
            .find_map(|i| i.image_ref.as_deref())
    }

    pub fn iteration_mut(&mut self, index: u32) -> Option<&mut Iteration> {
        self.iterations.iter_mut().find(|i| i.index == index)
    }
}

/// Follow-up state for one job; the session id is the job id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Prompt of the initial generation
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    /// Keyed by model display name
    pub columns: BTreeMap<String, ModelColumn>,
}

impl Session {
    pub fn column(&self, model: &str) -> Option<&ModelColumn> {
        self.columns.get(model)
    }

    /// Last `window` prompts of a column, oldest first, initial prompt included
    pub fn context_for(&self, model: &str, window: usize) -> Vec<String> {
        self.context_before(model, u32::MAX, window)
    }

    /// Like [`Session::context_for`], limited to iterations before `index`
    pub fn context_before(&self, model: &str, index: u32, window: usize) -> Vec<String> {
        let Some(column) = self.columns.get(model) else {
            return Vec::new();
        };
        let prompts: Vec<String> = std::iter::once(self.prompt.clone())
            .chain(
                column
                    .iterations
                    .iter()
                    .filter(|i| i.index < index)
                    .map(|i| i.prompt.clone()),
            )
            .collect();
        let skip = prompts.len().saturating_sub(window);
        prompts.into_iter().skip(skip).collect()
    }
}
