// External editing pipeline
//
// Each job runs two opaque external steps in order:
// - Preprocess: inverts the source video into latents
// - Edit: renders the edited video from a materialized configuration
//
// The materializer writes the configuration consumed by the edit step; the
// invoker runs both steps and reports where the result was written.

pub mod invoker;
pub mod materializer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use invoker::ScriptPipeline;
pub use materializer::{ConfigMaterializer, EditConfig};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::job::JobId;
use crate::media::MediaInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Preprocess,
    Edit,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preprocess => f.write_str("preprocess"),
            Self::Edit => f.write_str("edit"),
        }
    }
}

/// Everything both steps need for one job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub job_id: JobId,
    pub source_path: PathBuf,
    pub inversion_prompt: String,
    pub media: MediaInfo,
    pub latents_dir: PathBuf,
    pub config_path: PathBuf,
    pub result_path: PathBuf,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineInvoker: Send + Sync {
    /// Run preprocess then edit; returns the result path on success
    async fn run(&self, request: &PipelineRequest) -> Result<PathBuf>;
}

/// Factory for creating pipeline invoker instances
pub struct PipelineInvokerFactory;

impl PipelineInvokerFactory {
    /// Create the default invoker (configured script commands)
    pub fn create_invoker(config: PipelineConfig) -> Box<dyn PipelineInvoker> {
        Box::new(ScriptPipeline::new(config))
    }
}
