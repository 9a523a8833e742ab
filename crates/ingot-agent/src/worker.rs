use std::{sync::Arc, time::Duration};

use ingot_jobs::{Job, JobAction, JobResult, JobStatus};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    error::{PluginError, PluginResult},
    error_payload::FailurePayload,
    job_queue::JobQueue,
    plugin_manager::{Checkpoint, InstallRequest, OperationObserver, OperationOutcome, PluginManager},
};

/// Drains the job queue one job at a time.
#[derive(Clone)]
pub struct JobWorker {
    queue: Arc<JobQueue>,
    manager: Arc<PluginManager>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, manager: Arc<PluginManager>, poll_interval: Duration) -> Self {
        Self {
            queue,
            manager,
            poll_interval,
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "job worker started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if self.run_once().await {
                    continue;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("job worker stopped");
        })
    }

    /// Runs the oldest queued job, if any. Returns whether a job was taken.
    pub async fn run_once(&self) -> bool {
        let Some(job) = self.queue.next_queued() else {
            return false;
        };
        let id = job.id.to_string();
        if let Err(err) = self.queue.mark_running(&id) {
            tracing::warn!(job_id = %id, %err, "failed to start job");
            return true;
        }
        tracing::info!(job_id = %id, action = job.action.as_str(), target = %job.target.describe(), "job started");

        let observer = JobObserver {
            queue: self.queue.clone(),
            job_id: id.clone(),
        };
        match self.execute(&job, &observer).await {
            Ok(outcome) => {
                let result = JobResult {
                    plugin_name: outcome.plugin_name,
                    version: outcome.version,
                    previous_version: outcome.previous_version,
                    action: job.action,
                    outcome: outcome.outcome.as_str().to_string(),
                };
                match self.queue.mark_completed(&id, result) {
                    Ok(_) => tracing::info!(job_id = %id, "job completed"),
                    Err(err) => {
                        tracing::warn!(job_id = %id, %err, "job finished but could not be marked completed")
                    }
                }
            }
            Err(PluginError::Cancelled) => {
                tracing::info!(job_id = %id, "job stopped after cancellation");
            }
            Err(err) => {
                let failure = FailurePayload::from_error(&err);
                tracing::warn!(
                    job_id = %id,
                    code = %failure.code,
                    transient = err.is_transient(),
                    error = %failure.message,
                    "job failed"
                );
                if let Err(mark_err) = self.queue.mark_failed(&id, &failure) {
                    tracing::warn!(job_id = %id, err = %mark_err, "could not record job failure");
                }
            }
        }
        true
    }

    async fn execute(&self, job: &Job, obs: &JobObserver) -> PluginResult<OperationOutcome> {
        let target = &job.target;
        let name = || {
            target.name.as_deref().ok_or_else(|| {
                PluginError::InvalidRequest(format!("{} job has no plugin name", job.action.as_str()))
            })
        };
        match job.action {
            JobAction::Install => {
                let url = target.url.clone().ok_or_else(|| {
                    PluginError::InvalidRequest("install job has no source url".to_string())
                })?;
                let req = InstallRequest {
                    url,
                    custom_name: target.custom_name.clone(),
                    category: target.options.category.clone(),
                };
                self.manager.install(&req, obs).await
            }
            JobAction::Update => self.manager.update(name()?, obs).await,
            JobAction::Uninstall => {
                self.manager
                    .uninstall(name()?, target.options.delete_configs, obs)
            }
            JobAction::Enable => self.manager.toggle(name()?, true, obs),
            JobAction::Disable => self.manager.toggle(name()?, false, obs),
            JobAction::Rollback => self.manager.rollback(name()?, obs),
        }
    }
}

/// Bridges Plugin Manager progress into one job's log and cancellation state.
pub struct JobObserver {
    queue: Arc<JobQueue>,
    job_id: String,
}

impl OperationObserver for JobObserver {
    fn step(&self, message: &str) {
        tracing::debug!(job_id = %self.job_id, message, "job step");
        if let Err(err) = self.queue.append_log(&self.job_id, message) {
            tracing::debug!(job_id = %self.job_id, %err, "dropped job log line");
        }
    }

    fn checkpoint(&self, stage: Checkpoint) -> PluginResult<()> {
        match self.queue.status(&self.job_id)? {
            JobStatus::Cancelled => {
                tracing::info!(job_id = %self.job_id, stage = stage.as_str(), "cancellation observed");
                Err(PluginError::Cancelled)
            }
            _ => Ok(()),
        }
    }
}
