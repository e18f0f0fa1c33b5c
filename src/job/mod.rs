//! Job model and lifecycle.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub use registry::JobRegistry;

use crate::media::MediaInfo;

/// Opaque job handle given to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Fresh identifier, independent of anything the client sent.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed moves: queued -> processing, and any non-terminal state to a terminal one.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Queued, Self::Processing) => true,
            (Self::Queued | Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of one job, fixed before execution starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub prompt: String,
    pub inversion_prompt: String,
    pub media: MediaInfo,
    pub seed: u32,
}

impl JobParameters {
    /// Parameters with a seed drawn uniformly from the full `u32` range
    pub fn new(prompt: String, inversion_prompt: String, media: MediaInfo) -> Self {
        Self {
            prompt,
            inversion_prompt,
            media,
            seed: rand::random::<u32>(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub source_path: PathBuf,
    /// Set on the move to `completed` only
    pub result_path: Option<PathBuf>,
    pub parameters: JobParameters,
    /// Reason recorded on the move to `failed`
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, source_path: PathBuf, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Queued,
            source_path,
            result_path: None,
            parameters,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}
