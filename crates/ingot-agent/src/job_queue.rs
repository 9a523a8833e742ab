use std::sync::Mutex;

use ingot_jobs::{Job, JobAction, JobId, JobResult, JobStatus, JobTarget};

use crate::{
    error::{PluginError, PluginResult},
    error_payload::FailurePayload,
    store::DocumentStore,
};

const INTERRUPTED_REASON: &str = "interrupted by restart";

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueDocument {
    #[serde(default)]
    pub next_seq: u64,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Durable job collection. Every mutation rewrites the whole document.
pub struct JobQueue {
    store: Box<dyn DocumentStore<QueueDocument>>,
    doc: Mutex<QueueDocument>,
    history_max: usize,
    log_max: usize,
}

impl JobQueue {
    /// Loads the persisted queue. Jobs left `running` by a previous process are
    /// failed, since their partial work cannot be resumed.
    pub fn open(
        store: Box<dyn DocumentStore<QueueDocument>>,
        history_max: usize,
        log_max: usize,
    ) -> PluginResult<Self> {
        let mut doc = store.load()?.unwrap_or_default();
        let now = crate::now_unix_ms();
        let mut recovered = 0usize;
        for job in doc.jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
            tracing::warn!(job_id = %job.id, action = job.action.as_str(), "failing job interrupted by restart");
            job.status = JobStatus::Failed;
            job.error = Some(INTERRUPTED_REASON.to_string());
            job.error_code = Some("interrupted".to_string());
            job.completed_at_unix_ms = Some(now);
            job.push_log(now, INTERRUPTED_REASON, log_max);
            recovered += 1;
        }
        if let Some(max_seq) = doc.jobs.iter().filter_map(|j| seq_of(&j.id)).max() {
            doc.next_seq = doc.next_seq.max(max_seq + 1);
        }
        if recovered > 0 {
            store.save(&doc)?;
        }

        Ok(Self {
            store,
            doc: Mutex::new(doc),
            history_max: history_max.max(1),
            log_max,
        })
    }

    pub fn enqueue(&self, action: JobAction, target: JobTarget) -> PluginResult<Job> {
        let job = self.mutate(|doc| {
            let now = crate::now_unix_ms();
            let id = JobId::generate(now, doc.next_seq);
            doc.next_seq += 1;
            let job = Job::new(id, action, target, now);
            doc.jobs.push(job.clone());
            prune(doc, self.history_max);
            Ok(job)
        })?;
        tracing::info!(job_id = %job.id, action = action.as_str(), target = %job.target.describe(), "job queued");
        Ok(job)
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<Job> {
        let mut jobs = self.lock().jobs.clone();
        jobs.sort_by(|a, b| {
            b.created_at_unix_ms
                .cmp(&a.created_at_unix_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        jobs.truncate(limit);
        jobs
    }

    pub fn get(&self, id: &str) -> PluginResult<Job> {
        self.lock()
            .jobs
            .iter()
            .find(|j| j.id.as_str() == id)
            .cloned()
            .ok_or_else(|| PluginError::job_not_found(id))
    }

    pub fn status(&self, id: &str) -> PluginResult<JobStatus> {
        self.lock()
            .jobs
            .iter()
            .find(|j| j.id.as_str() == id)
            .map(|j| j.status)
            .ok_or_else(|| PluginError::job_not_found(id))
    }

    /// Oldest queued job. Only the worker calls this.
    pub fn next_queued(&self) -> Option<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by(|a, b| {
                a.created_at_unix_ms
                    .cmp(&b.created_at_unix_ms)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }

    pub fn mark_running(&self, id: &str) -> PluginResult<Job> {
        self.transition(id, JobStatus::Running, |job, now| {
            job.started_at_unix_ms = Some(now);
        })
    }

    pub fn append_log(&self, id: &str, message: &str) -> PluginResult<()> {
        let log_max = self.log_max;
        self.mutate(|doc| {
            let job = find_mut(doc, id)?;
            if job.status.is_terminal() {
                return Err(PluginError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status,
                    to: job.status,
                });
            }
            job.push_log(crate::now_unix_ms(), message, log_max);
            Ok(())
        })
    }

    pub fn mark_completed(&self, id: &str, result: JobResult) -> PluginResult<Job> {
        self.transition(id, JobStatus::Completed, |job, now| {
            job.result = Some(result);
            job.completed_at_unix_ms = Some(now);
        })
    }

    pub fn mark_failed(&self, id: &str, failure: &FailurePayload) -> PluginResult<Job> {
        let log_max = self.log_max;
        self.transition(id, JobStatus::Failed, |job, now| {
            job.push_log(now, format!("failed: {}", failure.display()), log_max);
            job.error = Some(failure.display());
            job.error_code = Some(failure.code.clone());
            job.completed_at_unix_ms = Some(now);
        })
    }

    pub fn mark_cancelled(&self, id: &str) -> PluginResult<Job> {
        let log_max = self.log_max;
        self.transition(id, JobStatus::Cancelled, |job, now| {
            job.push_log(now, "cancelled", log_max);
            job.completed_at_unix_ms = Some(now);
        })
    }

    /// Cancels a queued job outright. A running job is only flagged; the worker
    /// stops at its next checkpoint.
    pub fn cancel(&self, id: &str) -> PluginResult<Job> {
        let job = self.mark_cancelled(id)?;
        tracing::info!(job_id = %job.id, "job cancelled");
        Ok(job)
    }

    fn transition(
        &self,
        id: &str,
        to: JobStatus,
        apply: impl FnOnce(&mut Job, u64),
    ) -> PluginResult<Job> {
        let job = self.mutate(|doc| {
            let job = find_mut(doc, id)?;
            if !job.status.can_transition_to(to) {
                return Err(PluginError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status,
                    to,
                });
            }
            job.status = to;
            apply(job, crate::now_unix_ms());
            Ok(job.clone())
        })?;
        tracing::debug!(job_id = %job.id, status = to.as_str(), "job transitioned");
        Ok(job)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut QueueDocument) -> PluginResult<R>) -> PluginResult<R> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.store.save(&next)?;
        *guard = next;
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn find_mut<'a>(doc: &'a mut QueueDocument, id: &str) -> PluginResult<&'a mut Job> {
    doc.jobs
        .iter_mut()
        .find(|j| j.id.as_str() == id)
        .ok_or_else(|| PluginError::job_not_found(id))
}

/// Drops the oldest terminal jobs above `max`. Queued and running jobs stay.
fn prune(doc: &mut QueueDocument, max: usize) {
    while doc.jobs.len() > max {
        let oldest = doc
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status.is_terminal())
            .min_by(|(_, a), (_, b)| {
                a.created_at_unix_ms
                    .cmp(&b.created_at_unix_ms)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                doc.jobs.remove(i);
            }
            None => break,
        }
    }
}

fn seq_of(id: &JobId) -> Option<u64> {
    id.as_str().split('-').nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};

    fn queue() -> JobQueue {
        JobQueue::open(Box::new(MemoryStore::<QueueDocument>::default()), 200, 500).unwrap()
    }

    fn result(name: &str) -> JobResult {
        JobResult {
            plugin_name: name.to_string(),
            version: Some("1.0.0".into()),
            previous_version: None,
            action: JobAction::Install,
            outcome: "installed".into(),
        }
    }

    #[test]
    fn dequeues_in_creation_order() {
        let q = queue();
        let a = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
        let b = q.enqueue(JobAction::Enable, JobTarget::plugin("B")).unwrap();
        assert!(a.id < b.id);
        assert_eq!(a.status, JobStatus::Queued);

        assert_eq!(q.next_queued().unwrap().id, a.id);
        q.mark_running(a.id.as_str()).unwrap();
        assert_eq!(q.next_queued().unwrap().id, b.id);

        let listed = q.list(10);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
        assert_eq!(q.list(1).len(), 1);
    }

    #[test]
    fn lifecycle_sets_timestamps_and_result() {
        let q = queue();
        let job = q.enqueue(JobAction::Install, JobTarget::source("https://x/a.jar", None)).unwrap();
        let id = job.id.as_str();
        assert!(job.started_at_unix_ms.is_none());

        let running = q.mark_running(id).unwrap();
        assert!(running.started_at_unix_ms.is_some());
        q.append_log(id, "resolving").unwrap();

        let done = q.mark_completed(id, result("a")).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at_unix_ms.is_some());
        assert_eq!(done.result.unwrap().plugin_name, "a");
        assert_eq!(done.logs[0].message, "resolving");
    }

    #[test]
    fn illegal_transitions_leave_job_unchanged() {
        let q = queue();
        let job = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
        let id = job.id.as_str();

        let err = q.mark_completed(id, result("A")).unwrap_err();
        assert!(matches!(
            err,
            PluginError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
                ..
            }
        ));
        assert_eq!(q.get(id).unwrap(), job);

        q.mark_running(id).unwrap();
        let failure = FailurePayload::from_error(&PluginError::SourceUnavailable("down".into()));
        q.mark_failed(id, &failure).unwrap();
        let failed = q.get(id).unwrap();
        assert_eq!(failed.error_code.as_deref(), Some("source_unavailable"));

        assert!(q.mark_running(id).is_err());
        assert!(q.cancel(id).is_err());
        assert!(q.append_log(id, "late").is_err());
        assert_eq!(q.get(id).unwrap(), failed);
    }

    #[test]
    fn cancel_queued_and_running() {
        let q = queue();
        let a = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
        let b = q.enqueue(JobAction::Enable, JobTarget::plugin("B")).unwrap();

        q.cancel(a.id.as_str()).unwrap();
        assert_eq!(q.next_queued().unwrap().id, b.id);

        q.mark_running(b.id.as_str()).unwrap();
        let cancelled = q.cancel(b.id.as_str()).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(q.mark_completed(b.id.as_str(), result("B")).is_err());
        assert!(q.next_queued().is_none());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let q = queue();
        assert!(matches!(
            q.get("nope").unwrap_err(),
            PluginError::NotFound { kind: "job", .. }
        ));
        assert!(q.cancel("nope").is_err());
    }

    #[test]
    fn restart_fails_running_jobs_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let (queued, running, done) = {
            let q = JobQueue::open(Box::new(JsonFileStore::<QueueDocument>::new(&path)), 200, 500).unwrap();
            let queued = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
            let running = q.enqueue(JobAction::Enable, JobTarget::plugin("B")).unwrap();
            let done = q.enqueue(JobAction::Enable, JobTarget::plugin("C")).unwrap();
            q.mark_running(done.id.as_str()).unwrap();
            q.mark_completed(done.id.as_str(), result("C")).unwrap();
            q.mark_running(running.id.as_str()).unwrap();
            (queued, running, done)
        };

        let q = JobQueue::open(Box::new(JsonFileStore::<QueueDocument>::new(&path)), 200, 500).unwrap();
        assert_eq!(q.status(queued.id.as_str()).unwrap(), JobStatus::Queued);
        assert_eq!(q.status(done.id.as_str()).unwrap(), JobStatus::Completed);
        let interrupted = q.get(running.id.as_str()).unwrap();
        assert_eq!(interrupted.status, JobStatus::Failed);
        assert_eq!(interrupted.error.as_deref(), Some("interrupted by restart"));

        let next = q.enqueue(JobAction::Enable, JobTarget::plugin("D")).unwrap();
        assert!(next.id > done.id);
    }

    #[test]
    fn pruning_only_drops_terminal_jobs() {
        let q = JobQueue::open(Box::new(MemoryStore::<QueueDocument>::default()), 3, 500).unwrap();
        let first = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
        let second = q.enqueue(JobAction::Enable, JobTarget::plugin("B")).unwrap();
        q.mark_running(second.id.as_str()).unwrap();
        q.mark_completed(second.id.as_str(), result("B")).unwrap();
        q.enqueue(JobAction::Enable, JobTarget::plugin("C")).unwrap();
        q.enqueue(JobAction::Enable, JobTarget::plugin("D")).unwrap();

        let ids: Vec<_> = q.list(10).into_iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&first.id));
        assert!(!ids.contains(&second.id));

        q.enqueue(JobAction::Enable, JobTarget::plugin("E")).unwrap();
        assert_eq!(q.list(10).len(), 4);
    }

    #[test]
    fn log_is_capped() {
        let q = JobQueue::open(Box::new(MemoryStore::<QueueDocument>::default()), 10, 3).unwrap();
        let job = q.enqueue(JobAction::Enable, JobTarget::plugin("A")).unwrap();
        q.mark_running(job.id.as_str()).unwrap();
        for i in 0..5 {
            q.append_log(job.id.as_str(), &format!("step {i}")).unwrap();
        }
        let logs = q.get(job.id.as_str()).unwrap().logs;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].message, "step 4");
    }
}
