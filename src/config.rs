use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, FlowEditError};

// Default values for the server section
fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub intake: IntakeConfig,
    pub probe: ProbeConfig,
    pub pipeline: PipelineConfig,
    pub editing: EditingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP service listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Upper bound on jobs running their pipeline at the same time.
    /// Unset means every accepted job starts immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where validated uploads are stored, one file per job
    pub uploads_dir: PathBuf,
    /// Where edited results land, mirroring the uploads layout
    pub edited_dir: PathBuf,
    /// Where per-job editing configurations are written
    pub configs_dir: PathBuf,
    /// Where the preprocessing step saves inversion latents
    pub latents_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Accepted container extensions, compared case-insensitively
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path to ffprobe binary
    pub binary_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Preprocessing / inversion step
    pub preprocess: StepCommandConfig,
    /// Editing step
    pub edit: StepCommandConfig,
    /// Working directory for both steps; inherits the service's when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCommandConfig {
    /// Program to execute
    pub program: String,
    /// Leading arguments, placed before the per-job flags
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditingConfig {
    /// Device selector handed to the editing step
    pub device: String,
    /// Model version tag
    pub sd_version: String,
    pub guidance_scale: f64,
    /// Diffusion steps for editing
    pub n_timesteps: u32,
    /// Steps used when retrieving the inversion latents
    pub n_inversion_steps: u32,
    pub batch_size: u32,
    /// Attention injection threshold
    pub pnp_attn_t: f64,
    /// Feature injection threshold
    pub pnp_f_t: f64,
    pub negative_prompt: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_upload_bytes: default_max_upload_bytes(),
            max_concurrent_jobs: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("data/uploads"),
            edited_dir: PathBuf::from("data/edited"),
            configs_dir: PathBuf::from("configs"),
            latents_dir: PathBuf::from("latents"),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["mp4".to_string(), "avi".to_string(), "mkv".to_string()],
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffprobe".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocess: StepCommandConfig {
                program: "python".to_string(),
                args: vec!["preprocess.py".to_string()],
            },
            edit: StepCommandConfig {
                program: "python".to_string(),
                args: vec!["run_tokenflow_pnp.py".to_string()],
            },
            working_dir: None,
        }
    }
}

impl Default for EditingConfig {
    fn default() -> Self {
        Self {
            device: "cuda".to_string(),
            sd_version: "2.1".to_string(),
            guidance_scale: 7.5,
            n_timesteps: 50,
            n_inversion_steps: 500,
            batch_size: 8,
            pnp_attn_t: 0.5,
            pnp_f_t: 0.8,
            negative_prompt: "ugly, blurry, low res, unrealistic, unaesthetic".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create every storage directory that does not exist yet
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.uploads_dir, &self.edited_dir, &self.configs_dir, &self.latents_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Rooted at `base`, for tests and embedded use
    pub fn under<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            uploads_dir: base.join("data/uploads"),
            edited_dir: base.join("data/edited"),
            configs_dir: base.join("configs"),
            latents_dir: base.join("latents"),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowEditError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| FlowEditError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlowEditError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| FlowEditError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.intake.allowed_extensions.is_empty() {
            return Err(FlowEditError::Config("intake.allowed_extensions must not be empty".to_string()));
        }
        if self.server.max_concurrent_jobs == Some(0) {
            return Err(FlowEditError::Config("server.max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.pipeline.preprocess.program.is_empty() || self.pipeline.edit.program.is_empty() {
            return Err(FlowEditError::Config("pipeline step programs must be set".to_string()));
        }
        Ok(())
    }
}
