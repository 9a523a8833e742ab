use std::sync::Arc;

use ingot_jobs::{Job, JobAction, JobTarget};

use crate::{
    error::{PluginError, PluginResult},
    history::HistoryEntry,
    job_queue::JobQueue,
    plugin_manager::PluginManager,
    registry::PluginRecord,
    source::ResolvedSource,
};

/// Synchronous surface for callers: job submission and inspection plus
/// read-only views of the registry. Mutations only happen through jobs.
#[derive(Clone)]
pub struct JobApi {
    queue: Arc<JobQueue>,
    manager: Arc<PluginManager>,
}

impl JobApi {
    pub fn new(queue: Arc<JobQueue>, manager: Arc<PluginManager>) -> Self {
        Self { queue, manager }
    }

    pub fn submit(&self, action: JobAction, target: JobTarget) -> PluginResult<Job> {
        let target = validate(action, target)?;
        self.queue.enqueue(action, target)
    }

    pub fn list(&self, limit: usize) -> Vec<Job> {
        self.queue.list(limit)
    }

    pub fn get(&self, id: &str) -> PluginResult<Job> {
        self.queue.get(id)
    }

    pub fn cancel(&self, id: &str) -> PluginResult<Job> {
        self.queue.cancel(id)
    }

    /// Classifies and resolves a source before submission. Candidate lists
    /// are returned as-is for the caller to pick from.
    pub async fn resolve(&self, url: &str) -> PluginResult<ResolvedSource> {
        self.manager.resolver().resolve(url).await
    }

    pub fn plugins(&self) -> Vec<PluginRecord> {
        self.manager.list()
    }

    pub fn history(&self, limit: usize) -> PluginResult<Vec<HistoryEntry>> {
        self.manager.history().recent(limit)
    }

    /// Every recorded operation on one plugin, oldest first.
    pub fn plugin_history(&self, name: &str) -> PluginResult<Vec<HistoryEntry>> {
        self.manager.history().for_plugin(name.trim())
    }
}

fn validate(action: JobAction, mut target: JobTarget) -> PluginResult<JobTarget> {
    let trimmed = |v: Option<String>| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    target.name = trimmed(target.name);
    target.url = trimmed(target.url);
    target.custom_name = trimmed(target.custom_name);

    match action {
        JobAction::Install if target.url.is_none() => Err(PluginError::InvalidRequest(
            "install needs a source url".to_string(),
        )),
        JobAction::Install => Ok(target),
        _ if target.name.is_none() => Err(PluginError::InvalidRequest(format!(
            "{} needs a plugin name",
            action.as_str()
        ))),
        _ => Ok(target),
    }
}
