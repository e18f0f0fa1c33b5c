use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::config::{EditingConfig, StorageConfig};
use crate::error::Result;
use crate::job::Job;

/// Declarative configuration read by the edit step, stored as YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditConfig {
    pub seed: u32,
    pub device: String,
    pub output_path: PathBuf,
    pub data_path: PathBuf,
    pub latents_path: PathBuf,
    pub n_inversion_steps: u32,
    pub n_frames: u32,
    pub sd_version: String,
    pub guidance_scale: f64,
    pub n_timesteps: u32,
    pub prompt: String,
    pub negative_prompt: String,
    pub batch_size: u32,
    pub pnp_attn_t: f64,
    pub pnp_f_t: f64,
}

pub struct ConfigMaterializer {
    defaults: EditingConfig,
    configs_dir: PathBuf,
    latents_dir: PathBuf,
}

impl ConfigMaterializer {
    pub fn new(defaults: EditingConfig, storage: &StorageConfig) -> Self {
        Self {
            defaults,
            configs_dir: storage.configs_dir.clone(),
            latents_dir: storage.latents_dir.clone(),
        }
    }

    /// Stable location of a job's configuration
    pub fn config_path(&self, job: &Job) -> PathBuf {
        self.configs_dir.join(format!("config_{}.yaml", job.id))
    }

    pub fn latents_dir(&self) -> &Path {
        &self.latents_dir
    }

    /// Build the configuration record for `job`
    pub fn build(&self, job: &Job, result_path: &Path) -> EditConfig {
        let d = &self.defaults;
        EditConfig {
            seed: job.parameters.seed,
            device: d.device.clone(),
            output_path: result_path.to_path_buf(),
            data_path: job.source_path.clone(),
            latents_path: self.latents_dir.clone(),
            n_inversion_steps: d.n_inversion_steps,
            n_frames: job.parameters.media.frame_count,
            sd_version: d.sd_version.clone(),
            guidance_scale: d.guidance_scale,
            n_timesteps: d.n_timesteps,
            prompt: job.parameters.prompt.clone(),
            negative_prompt: d.negative_prompt.clone(),
            batch_size: d.batch_size,
            pnp_attn_t: d.pnp_attn_t,
            pnp_f_t: d.pnp_f_t,
        }
    }

    /// Write the configuration for `job` and return its path
    pub async fn materialize(&self, job: &Job, result_path: &Path) -> Result<PathBuf> {
        let path = self.config_path(job);
        let record = self.build(job, result_path);

        fs::create_dir_all(&self.configs_dir).await?;
        fs::write(&path, serde_yml::to_string(&record)?).await?;

        info!(job_id = %job.id, seed = record.seed, "Wrote edit configuration to {}", path.display());
        Ok(path)
    }
}
