use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FlowEditError, Result};
use super::{Job, JobId, JobState};

/// Process-lifetime store of every job.
///
/// The map is only reachable through these methods, each of which holds the
/// lock for the whole read-modify-write. Callers get cloned snapshots.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job; an existing id is never overwritten
    pub async fn create(&self, job: Job) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(FlowEditError::DuplicateJob(job.id));
        }
        debug!(job_id = %job.id, "Registered job");
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn set_state(&self, id: &JobId, state: JobState) -> Result<Job> {
        self.update(id, state, |_| {}).await
    }

    /// Move to `completed` and record where the result lives
    pub async fn complete(&self, id: &JobId, result_path: PathBuf) -> Result<Job> {
        self.update(id, JobState::Completed, |job| job.result_path = Some(result_path))
            .await
    }

    /// Move to `failed` and record why
    pub async fn fail(&self, id: &JobId, reason: impl Into<String>) -> Result<Job> {
        let reason = reason.into();
        self.update(id, JobState::Failed, |job| job.failure = Some(reason))
            .await
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Snapshot of all jobs, oldest first
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    async fn update<F>(&self, id: &JobId, state: JobState, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| FlowEditError::UnknownJob(id.clone()))?;

        if !job.state.can_transition_to(state) {
            warn!(job_id = %id, from = %job.state, to = %state, "Rejected job state change");
            return Err(FlowEditError::InvalidTransition {
                id: id.clone(),
                from: job.state,
                to: state,
            });
        }

        debug!(job_id = %id, from = %job.state, to = %state, "Job state changed");
        job.state = state;
        job.updated_at = Utc::now();
        apply(job);
        Ok(job.clone())
    }
}
