//! Job dispatch: synchronous intake, then one background task per job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, StorageConfig};
use crate::error::{FlowEditError, Result};
use crate::intake::{IntakeValidator, Submission};
use crate::job::{Job, JobId, JobParameters, JobRegistry, JobState};
use crate::media::{MediaProber, MediaProberFactory};
use crate::pipeline::{ConfigMaterializer, PipelineInvoker, PipelineInvokerFactory, PipelineRequest};

/// Handle to an accepted job.
///
/// The join handle resolves to the job's terminal state. Dropping it detaches
/// the task; the registry is updated either way.
#[derive(Debug)]
pub struct JobTicket {
    pub id: JobId,
    pub handle: JoinHandle<JobState>,
}

impl JobTicket {
    /// Wait for the background task to reach a terminal state
    pub async fn wait(self) -> JobState {
        match self.handle.await {
            Ok(state) => state,
            Err(e) => {
                error!(job_id = %self.id, "Job supervisor task ended abnormally: {}", e);
                JobState::Failed
            }
        }
    }
}

/// State shared with background tasks
struct Worker {
    registry: Arc<JobRegistry>,
    invoker: Arc<dyn PipelineInvoker>,
    materializer: ConfigMaterializer,
    storage: StorageConfig,
    limiter: Option<Arc<Semaphore>>,
}

pub struct JobDispatcher {
    intake: IntakeValidator,
    prober: Arc<dyn MediaProber>,
    worker: Arc<Worker>,
}

impl JobDispatcher {
    pub fn new(
        config: &Config,
        registry: Arc<JobRegistry>,
        prober: Arc<dyn MediaProber>,
        invoker: Arc<dyn PipelineInvoker>,
    ) -> Self {
        let limiter = config
            .server
            .max_concurrent_jobs
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        Self {
            intake: IntakeValidator::new(&config.intake),
            prober,
            worker: Arc::new(Worker {
                registry,
                invoker,
                materializer: ConfigMaterializer::new(config.editing.clone(), &config.storage),
                storage: config.storage.clone(),
                limiter,
            }),
        }
    }

    /// Dispatcher wired to ffprobe and the configured pipeline scripts
    pub fn from_config(config: &Config, registry: Arc<JobRegistry>) -> Self {
        let prober: Arc<dyn MediaProber> = Arc::from(MediaProberFactory::create_prober(config.probe.clone()));
        let invoker: Arc<dyn PipelineInvoker> =
            Arc::from(PipelineInvokerFactory::create_invoker(config.pipeline.clone()));
        Self::new(config, registry, prober, invoker)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.worker.registry
    }

    /// Validate, store and probe a submission, then start its pipeline.
    ///
    /// Returns as soon as the background task is spawned. Any error returned
    /// here means no job was created.
    pub async fn submit(&self, submission: Submission) -> Result<JobTicket> {
        let accepted = self.intake.validate(submission)?;

        let id = JobId::generate();
        let source_path = self
            .worker
            .storage
            .uploads_dir
            .join(format!("{}.{}", id, accepted.extension));

        tokio::fs::create_dir_all(&self.worker.storage.uploads_dir).await?;
        tokio::fs::write(&source_path, &accepted.data).await?;
        info!(
            job_id = %id,
            "Stored upload {} as {}",
            accepted.original_filename,
            source_path.display()
        );

        let media = match self.prober.probe(&source_path).await {
            Ok(media) => media,
            Err(e) => {
                discard_upload(&source_path).await;
                return Err(e);
            }
        };

        let parameters = JobParameters::new(accepted.prompt, accepted.inversion_prompt, media);
        let job = match self.worker.registry.create(Job::new(id.clone(), source_path.clone(), parameters)).await {
            Ok(job) => job,
            Err(e) => {
                discard_upload(&source_path).await;
                return Err(e);
            }
        };
        let job = self.worker.registry.set_state(&job.id, JobState::Processing).await?;

        info!(job_id = %job.id, frames = media.frame_count, seed = job.parameters.seed, "Job accepted");

        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(worker.supervise(job));

        Ok(JobTicket { id, handle })
    }
}

impl Worker {
    /// Run the job in its own task and record the outcome.
    ///
    /// A panic inside the job surfaces as a `JoinError` here and is recorded
    /// as a failure like any other error.
    async fn supervise(self: Arc<Self>, job: Job) -> JobState {
        let id = job.id.clone();
        let runner = Arc::clone(&self);
        let outcome = tokio::spawn(async move { runner.execute(job).await }).await;

        let recorded = match outcome {
            Ok(Ok(result_path)) => {
                info!(job_id = %id, "Job completed: {}", result_path.display());
                self.registry.complete(&id, result_path).await
            }
            Ok(Err(e)) => {
                error!(job_id = %id, "Job failed: {}", e);
                self.registry.fail(&id, e.to_string()).await
            }
            Err(e) => {
                error!(job_id = %id, "Job task aborted: {}", e);
                self.registry.fail(&id, format!("internal error: {}", e)).await
            }
        };

        match recorded {
            Ok(job) => job.state,
            Err(e) => {
                warn!(job_id = %id, "Could not record job outcome: {}", e);
                self.registry
                    .get(&id)
                    .await
                    .map(|job| job.state)
                    .unwrap_or(JobState::Failed)
            }
        }
    }

    async fn execute(&self, job: Job) -> Result<PathBuf> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                Arc::clone(limiter)
                    .acquire_owned()
                    .await
                    .map_err(|e| FlowEditError::Config(format!("job limiter closed: {}", e)))?,
            ),
            None => None,
        };

        let result_path = result_path_for(&self.storage, &job.source_path);
        if let Some(parent) = result_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config_path = self.materializer.materialize(&job, &result_path).await?;

        let request = PipelineRequest {
            job_id: job.id.clone(),
            source_path: job.source_path.clone(),
            inversion_prompt: job.parameters.inversion_prompt.clone(),
            media: job.parameters.media,
            latents_dir: self.materializer.latents_dir().to_path_buf(),
            config_path,
            result_path,
        };

        self.invoker.run(&request).await
    }
}

/// Result location: the source's path relative to the uploads root, re-rooted
/// under the edited root.
pub fn result_path_for(storage: &StorageConfig, source_path: &Path) -> PathBuf {
    let relative = pathdiff::diff_paths(source_path, &storage.uploads_dir)
        .filter(|rel| rel.is_relative() && !rel.starts_with(".."))
        .or_else(|| source_path.file_name().map(PathBuf::from))
        .unwrap_or_else(|| source_path.to_path_buf());
    storage.edited_dir.join(relative)
}

async fn discard_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove rejected upload {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, StepCommandConfig};
    use crate::intake::Upload;
    use crate::media::{MediaInfo, MockMediaProber};
    use crate::pipeline::{EditConfig, MockPipelineInvoker, ScriptPipeline};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const TEN_FRAMES: MediaInfo = MediaInfo { width: 64, height: 64, frame_count: 10 };

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage = StorageConfig::under(dir.path());
        config
    }

    fn submission(filename: &str) -> Submission {
        Submission {
            video: Some(Upload {
                filename: filename.to_string(),
                data: b"fake video bytes".to_vec(),
            }),
            prompt: Some("a red car".to_string()),
            inversion_prompt: None,
        }
    }

    fn prober_returning(info: MediaInfo) -> Arc<dyn MediaProber> {
        let mut prober = MockMediaProber::new();
        prober.expect_probe().returning(move |_| Ok(info));
        Arc::new(prober)
    }

    fn true_step() -> StepCommandConfig {
        StepCommandConfig { program: "true".to_string(), args: Vec::new() }
    }

    /// Pipeline whose edit step leaves an empty result for every stored upload
    fn writing_pipeline(storage: &StorageConfig) -> Arc<dyn PipelineInvoker> {
        let script = format!(
            "for f in '{}'/*; do touch '{}'/\"$(basename \"$f\")\"; done",
            storage.uploads_dir.display(),
            storage.edited_dir.display()
        );
        Arc::new(ScriptPipeline::new(PipelineConfig {
            preprocess: true_step(),
            edit: StepCommandConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script, "edit".to_string()],
            },
            working_dir: None,
        }))
    }

    fn silent_pipeline() -> Arc<dyn PipelineInvoker> {
        Arc::new(ScriptPipeline::new(PipelineConfig {
            preprocess: true_step(),
            edit: true_step(),
            working_dir: None,
        }))
    }

    /// Invoker that blocks until released
    struct GatedInvoker {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl PipelineInvoker for GatedInvoker {
        async fn run(&self, request: &PipelineRequest) -> Result<PathBuf> {
            self.gate.notified().await;
            Ok(request.result_path.clone())
        }
    }

    struct PanickingInvoker;

    #[async_trait]
    impl PipelineInvoker for PanickingInvoker {
        async fn run(&self, _request: &PipelineRequest) -> Result<PathBuf> {
            panic!("pipeline bug");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ten_frame_video_completes_with_materialized_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());
        let dispatcher = JobDispatcher::new(
            &config,
            registry.clone(),
            prober_returning(TEN_FRAMES),
            writing_pipeline(&config.storage),
        );

        let ticket = dispatcher.submit(submission("clip.mp4")).await.unwrap();
        let id = ticket.id.clone();
        assert_eq!(registry.len().await, 1);

        assert_eq!(ticket.wait().await, JobState::Completed);

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        let result_path = config.storage.edited_dir.join(format!("{}.mp4", id));
        assert_eq!(job.result_path.as_ref(), Some(&result_path));
        assert!(result_path.exists());
        assert!(job.source_path.exists());

        let written = std::fs::read_to_string(config.storage.configs_dir.join(format!("config_{}.yaml", id))).unwrap();
        let edit_config: EditConfig = serde_yml::from_str(&written).unwrap();
        assert_eq!(edit_config.n_frames, 10);
        assert_eq!(edit_config.seed, job.parameters.seed);
        assert_eq!(edit_config.prompt, "a red car");
        assert_eq!(edit_config.output_path, result_path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_result_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());
        let dispatcher = JobDispatcher::new(&config, registry.clone(), prober_returning(TEN_FRAMES), silent_pipeline());

        let ticket = dispatcher.submit(submission("clip.mp4")).await.unwrap();
        let id = ticket.id.clone();
        assert_eq!(ticket.wait().await, JobState::Failed);

        let job = registry.get(&id).await.unwrap();
        assert!(job.result_path.is_none());
        assert!(job.failure.unwrap().contains("no result"));
    }

    #[tokio::test]
    async fn test_submit_returns_before_pipeline_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());
        let gate = Arc::new(Notify::new());
        let invoker = Arc::new(GatedInvoker { gate: gate.clone() });
        let dispatcher = JobDispatcher::new(&config, registry.clone(), prober_returning(TEN_FRAMES), invoker);

        let ticket = dispatcher.submit(submission("clip.mp4")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.get(&ticket.id).await.unwrap().state, JobState::Processing);
        assert!(!ticket.handle.is_finished());

        gate.notify_one();
        assert_eq!(ticket.wait().await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_unsupported_type_creates_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());

        let mut prober = MockMediaProber::new();
        prober.expect_probe().times(0);
        let mut invoker = MockPipelineInvoker::new();
        invoker.expect_run().times(0);
        let dispatcher = JobDispatcher::new(&config, registry.clone(), Arc::new(prober), Arc::new(invoker));

        let err = dispatcher.submit(submission("clip.txt")).await.unwrap_err();
        assert!(matches!(err, FlowEditError::UnsupportedType(_)));
        assert!(registry.is_empty().await);
        assert!(!config.storage.uploads_dir.exists());
    }

    #[tokio::test]
    async fn test_probe_failure_creates_no_job_and_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());

        let mut prober = MockMediaProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|path| Err(FlowEditError::probe(path, "no video stream found")));
        let mut invoker = MockPipelineInvoker::new();
        invoker.expect_run().times(0);
        let dispatcher = JobDispatcher::new(&config, registry.clone(), Arc::new(prober), Arc::new(invoker));

        let err = dispatcher.submit(submission("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, FlowEditError::Probe { .. }));
        assert!(registry.is_empty().await);
        assert_eq!(std::fs::read_dir(&config.storage.uploads_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_error_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());

        let mut invoker = MockPipelineInvoker::new();
        invoker.expect_run().times(1).returning(|_| {
            Err(FlowEditError::Pipeline {
                step: crate::pipeline::PipelineStep::Preprocess,
                status: "exit status: 1".to_string(),
                detail: String::new(),
            })
        });
        let dispatcher = JobDispatcher::new(&config, registry.clone(), prober_returning(TEN_FRAMES), Arc::new(invoker));

        let ticket = dispatcher.submit(submission("clip.mp4")).await.unwrap();
        let id = ticket.id.clone();
        assert_eq!(ticket.wait().await, JobState::Failed);

        let job = registry.get(&id).await.unwrap();
        assert!(job.result_path.is_none());
        assert!(job.failure.unwrap().contains("preprocess"));
    }

    #[tokio::test]
    async fn test_panicking_pipeline_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());
        let dispatcher = JobDispatcher::new(
            &config,
            registry.clone(),
            prober_returning(TEN_FRAMES),
            Arc::new(PanickingInvoker),
        );

        let ticket = dispatcher.submit(submission("clip.mp4")).await.unwrap();
        let id = ticket.id.clone();
        assert_eq!(ticket.wait().await, JobState::Failed);
        assert_eq!(registry.get(&id).await.unwrap().state, JobState::Failed);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_each_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let registry = Arc::new(JobRegistry::new());
        let dispatcher = Arc::new(JobDispatcher::new(
            &config,
            registry.clone(),
            prober_returning(TEN_FRAMES),
            writing_pipeline(&config.storage),
        ));

        let mut submits = Vec::new();
        for i in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            submits.push(tokio::spawn(async move {
                dispatcher.submit(submission(&format!("clip-{}.mkv", i))).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for submit in submits {
            let ticket = submit.await.unwrap();
            ids.push(ticket.id.clone());
            assert_eq!(ticket.wait().await, JobState::Completed);
        }

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.len().await, 8);
    }

    #[tokio::test]
    async fn test_concurrency_cap_holds_second_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.server.max_concurrent_jobs = Some(1);
        let registry = Arc::new(JobRegistry::new());
        let gate = Arc::new(Notify::new());
        let invoker = Arc::new(GatedInvoker { gate: gate.clone() });
        let dispatcher = JobDispatcher::new(&config, registry.clone(), prober_returning(TEN_FRAMES), invoker);

        let first = dispatcher.submit(submission("a.mp4")).await.unwrap();
        let second = dispatcher.submit(submission("b.mp4")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the first job holds the permit, so only its config exists
        let first_config = config.storage.configs_dir.join(format!("config_{}.yaml", first.id));
        let second_config = config.storage.configs_dir.join(format!("config_{}.yaml", second.id));
        assert!(first_config.exists());
        assert!(!second_config.exists());

        gate.notify_one();
        assert_eq!(first.wait().await, JobState::Completed);
        gate.notify_one();
        assert_eq!(second.wait().await, JobState::Completed);
    }

    #[test]
    fn test_result_path_mirrors_upload_layout() {
        let storage = StorageConfig::default();
        let source = storage.uploads_dir.join("abc.mp4");
        assert_eq!(result_path_for(&storage, &source), PathBuf::from("data/edited/abc.mp4"));

        let outside = PathBuf::from("/tmp/elsewhere/abc.mkv");
        assert_eq!(result_path_for(&storage, &outside), PathBuf::from("data/edited/abc.mkv"));
    }
}
