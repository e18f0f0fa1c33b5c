//! Request intake: checks a submission before anything touches the disk.

use tracing::debug;

use crate::config::IntakeConfig;
use crate::error::{FlowEditError, Result};

/// Uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Raw submission, every part optional until validated
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub video: Option<Upload>,
    pub prompt: Option<String>,
    pub inversion_prompt: Option<String>,
}

/// Submission that passed intake
#[derive(Debug, Clone)]
pub struct AcceptedSubmission {
    pub data: Vec<u8>,
    /// Lower-cased extension used for the stored copy
    pub extension: String,
    pub original_filename: String,
    pub prompt: String,
    pub inversion_prompt: String,
}

#[derive(Debug, Clone)]
pub struct IntakeValidator {
    allowed_extensions: Vec<String>,
}

impl IntakeValidator {
    pub fn new(config: &IntakeConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Validate a submission without side effects
    pub fn validate(&self, submission: Submission) -> Result<AcceptedSubmission> {
        let upload = submission
            .video
            .ok_or_else(|| FlowEditError::Validation("missing video file".to_string()))?;

        let prompt = submission
            .prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FlowEditError::Validation("missing prompt".to_string()))?;

        if upload.filename.trim().is_empty() {
            return Err(FlowEditError::Validation("uploaded video has no filename".to_string()));
        }

        let extension = self.allowed_extension(&upload.filename)?;

        if upload.data.is_empty() {
            return Err(FlowEditError::Validation("uploaded video is empty".to_string()));
        }

        let inversion_prompt = submission
            .inversion_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| prompt.clone());

        debug!("Accepted upload {} ({} bytes)", upload.filename, upload.data.len());

        Ok(AcceptedSubmission {
            data: upload.data,
            extension,
            original_filename: upload.filename,
            prompt,
            inversion_prompt,
        })
    }

    /// Extension after the final `.`, lower-cased, if it is on the allow-list
    pub fn allowed_extension(&self, filename: &str) -> Result<String> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .ok_or_else(|| FlowEditError::UnsupportedType(format!("{} has no extension", filename)))?;

        if self.allowed_extensions.contains(&extension) {
            Ok(extension)
        } else {
            Err(FlowEditError::UnsupportedType(format!(
                "{} (allowed: {})",
                filename,
                self.allowed_extensions.join(", ")
            )))
        }
    }
}
