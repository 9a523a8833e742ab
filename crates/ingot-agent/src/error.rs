use ingot_jobs::JobStatus;

#[derive(thiserror::Error, Debug)]
pub enum PluginError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("rate limited by {origin}")]
    RateLimited {
        origin: String,
        reset_at_unix: Option<u64>,
    },
    #[error("unrecognized source: {0}")]
    UnrecognizedSource(String),
    #[error("no compatible artifact: {0}")]
    NoCompatibleArtifact(String),
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("missing manifest: {0}")]
    MissingManifest(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("no backup available for plugin {0}")]
    NoBackupAvailable(String),
    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("registry write conflict: {0}")]
    RegistryWriteConflict(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    pub fn plugin_not_found(name: &str) -> Self {
        PluginError::NotFound {
            kind: "plugin",
            id: name.to_string(),
        }
    }

    pub fn job_not_found(id: &str) -> Self {
        PluginError::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PluginError::SourceUnavailable(_) => "source_unavailable",
            PluginError::RateLimited { .. } => "rate_limited",
            PluginError::UnrecognizedSource(_) => "unrecognized_source",
            PluginError::NoCompatibleArtifact(_) => "no_compatible_artifact",
            PluginError::InvalidArchive(_) => "invalid_archive",
            PluginError::MissingManifest(_) => "missing_manifest",
            PluginError::NotFound { .. } => "not_found",
            PluginError::NoBackupAvailable(_) => "no_backup_available",
            PluginError::InvalidTransition { .. } => "invalid_transition",
            PluginError::RegistryWriteConflict(_) => "registry_write_conflict",
            PluginError::InvalidRequest(_) => "invalid_request",
            PluginError::Cancelled => "cancelled",
            PluginError::Io(_) => "io",
            PluginError::Serialize(_) => "serialize",
        }
    }

    /// Operator-facing guidance, when there is something useful to say.
    pub fn hint(&self) -> Option<String> {
        match self {
            PluginError::RateLimited {
                reset_at_unix: Some(reset),
                ..
            } => Some(format!(
                "The origin is rate limiting requests. Wait until {reset} (unix seconds) and submit the job again."
            )),
            PluginError::RateLimited { .. } => Some(
                "The origin is rate limiting requests. Wait a few minutes and submit the job again."
                    .to_string(),
            ),
            PluginError::SourceUnavailable(_) => {
                Some("The origin could not be reached. Retry later with a new job.".to_string())
            }
            PluginError::UnrecognizedSource(_) => Some(
                "Paste a direct .jar link, a GitHub release link, or a Modrinth project page."
                    .to_string(),
            ),
            PluginError::InvalidArchive(_) | PluginError::MissingManifest(_) => Some(
                "The download is not a server plugin. Nothing installed was changed.".to_string(),
            ),
            PluginError::NoBackupAvailable(_) => {
                Some("Rollback needs a previous install of the same plugin.".to_string())
            }
            _ => None,
        }
    }

    /// Whether a retry by submitting a new job might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PluginError::SourceUnavailable(_) | PluginError::RateLimited { .. }
        )
    }
}
