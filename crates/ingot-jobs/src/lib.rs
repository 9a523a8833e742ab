use specta::Type;

/// Opaque job identifier.
///
/// Formatted as `{created_at_ms:013}-{seq:06}-{random}` so that lexicographic
/// order matches creation order, including jobs created in the same millisecond.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, Type,
)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate(created_at_unix_ms: u64, seq: u64) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{created_at_unix_ms:013}-{:06}-{}",
            seq % 1_000_000,
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Install,
    Uninstall,
    Update,
    Enable,
    Disable,
    Rollback,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Install => "install",
            JobAction::Uninstall => "uninstall",
            JobAction::Update => "update",
            JobAction::Enable => "enable",
            JobAction::Disable => "disable",
            JobAction::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal edges: queued -> running -> {completed, failed}, and
    /// {queued, running} -> cancelled. Nothing re-enters queued.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct JobOptions {
    #[serde(default)]
    pub delete_configs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// What a job acts on. `install` carries a resolved source URL, every other
/// action names an installed plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct JobTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobTarget {
    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn source(url: impl Into<String>, custom_name: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            custom_name,
            ..Self::default()
        }
    }

    /// Short human label used in logs.
    pub fn describe(&self) -> String {
        match (&self.name, &self.url, &self.custom_name) {
            (Some(name), _, _) => name.clone(),
            (None, Some(url), Some(custom)) => format!("{custom} ({url})"),
            (None, Some(url), None) => url.clone(),
            (None, None, Some(custom)) => custom.clone(),
            (None, None, None) => "<none>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct LogEntry {
    pub timestamp_unix_ms: u64,
    pub message: String,
}

/// Outcome recorded on a completed job.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct JobResult {
    pub plugin_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    pub action: JobAction,
    /// History outcome, e.g. `installed`, `upgrade`, `uninstalled`.
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
pub struct Job {
    pub id: JobId,
    pub action: JobAction,
    pub target: JobTarget,
    pub status: JobStatus,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub created_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_unix_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_unix_ms: Option<u64>,
}

impl Job {
    pub fn new(id: JobId, action: JobAction, target: JobTarget, now_unix_ms: u64) -> Self {
        Self {
            id,
            action,
            target,
            status: JobStatus::Queued,
            logs: Vec::new(),
            result: None,
            error: None,
            error_code: None,
            created_at_unix_ms: now_unix_ms,
            started_at_unix_ms: None,
            completed_at_unix_ms: None,
        }
    }

    /// Appends a log line, dropping the oldest entries beyond `max_entries`.
    pub fn push_log(&mut self, now_unix_ms: u64, message: impl Into<String>, max_entries: usize) {
        self.logs.push(LogEntry {
            timestamp_unix_ms: now_unix_ms,
            message: message.into(),
        });
        let max = max_entries.max(1);
        if self.logs.len() > max {
            let excess = self.logs.len() - max;
            self.logs.drain(..excess);
        }
    }
}
