use std::path::PathBuf;

use thiserror::Error;

use crate::job::{JobId, JobState};
use crate::pipeline::PipelineStep;

#[derive(Error, Debug)]
pub enum FlowEditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Failed to probe {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("Pipeline step '{step}' failed ({status}): {detail}")]
    Pipeline {
        step: PipelineStep,
        status: String,
        detail: String,
    },

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowEditError {
    /// Errors caused by the submitted request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnsupportedType(_))
    }

    pub fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowEditError>;
