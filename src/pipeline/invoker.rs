use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, StepCommandConfig};
use crate::error::{FlowEditError, Result};
use crate::media::command::{stderr_tail, ExternalCommand};
use super::{PipelineInvoker, PipelineRequest, PipelineStep};

/// Runs the two pipeline steps as configured external programs.
pub struct ScriptPipeline {
    config: PipelineConfig,
}

impl ScriptPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    fn base_command(&self, step: &StepCommandConfig, description: &str) -> ExternalCommand {
        ExternalCommand::new(&step.program, description)
            .args(step.args.iter().cloned())
            .current_dir(self.config.working_dir.clone())
    }

    /// Inversion / preprocessing command for `request`
    pub fn preprocess_command(&self, request: &PipelineRequest) -> ExternalCommand {
        self.base_command(&self.config.preprocess, "Preprocessing")
            .path_flag("--data_path", &request.source_path)
            .flag("--inversion_prompt", &request.inversion_prompt)
            .path_flag("--save_dir", &request.latents_dir)
            .flag("--H", request.media.height)
            .flag("--W", request.media.width)
            .flag("--n_frames", request.media.frame_count)
    }

    /// Editing command for `request`
    pub fn edit_command(&self, request: &PipelineRequest) -> ExternalCommand {
        self.base_command(&self.config.edit, "Editing")
            .path_flag("--config_path", &request.config_path)
    }

    async fn run_step(&self, request: &PipelineRequest, step: PipelineStep, command: ExternalCommand) -> Result<()> {
        info!(job_id = %request.job_id, %step, "Starting pipeline step");

        let output = command.execute().await.map_err(|e| FlowEditError::Pipeline {
            step,
            status: "not started".to_string(),
            detail: format!("failed to run {}: {}", command.program, e),
        })?;

        if !output.status.success() {
            let detail = stderr_tail(&output, 5);
            error!(job_id = %request.job_id, %step, status = %output.status, "Pipeline step failed");
            return Err(FlowEditError::Pipeline {
                step,
                status: output.status.to_string(),
                detail,
            });
        }

        info!(job_id = %request.job_id, %step, "Pipeline step finished");
        Ok(())
    }
}

#[async_trait]
impl PipelineInvoker for ScriptPipeline {
    async fn run(&self, request: &PipelineRequest) -> Result<PathBuf> {
        self.run_step(request, PipelineStep::Preprocess, self.preprocess_command(request))
            .await?;
        self.run_step(request, PipelineStep::Edit, self.edit_command(request))
            .await?;

        if !tokio::fs::try_exists(&request.result_path).await.unwrap_or(false) {
            warn!(
                job_id = %request.job_id,
                "Edit step exited cleanly but wrote nothing to {}",
                request.result_path.display()
            );
            return Err(FlowEditError::Pipeline {
                step: PipelineStep::Edit,
                status: "exit status: 0".to_string(),
                detail: format!("no result at {}", request.result_path.display()),
            });
        }

        Ok(request.result_path.clone())
    }
}
