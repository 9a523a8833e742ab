use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use ingot_jobs::JobAction;

use crate::{
    config::AgentConfig,
    error::{PluginError, PluginResult},
    fetch::{ArtifactFetcher, HttpFetcher},
    history::{HistoryEntry, HistoryLog, HistoryOutcome},
    metadata,
    registry::{BackupInfo, PluginRecord, Registry, RegistryDocument},
    source::{self, Artifact, PluginSource, ResolvedArtifacts, SourceKind, SourceResolver},
    store::{JsonFileStore, copy_atomic},
    version::VersionRelation,
};

const DEFAULT_CATEGORY: &str = "general";
const PLATFORM_HINTS: &[&str] = &["paper", "bukkit", "spigot", "purpur"];

/// Points at which a running operation may be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    PreDownload,
    PreWrite,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::PreDownload => "pre-download",
            Checkpoint::PreWrite => "pre-write",
        }
    }
}

/// Receives progress from a Plugin Manager operation.
///
/// `checkpoint` returning `Err(PluginError::Cancelled)` aborts the operation
/// before its next side effect.
pub trait OperationObserver: Send + Sync {
    fn step(&self, message: &str);
    fn checkpoint(&self, stage: Checkpoint) -> PluginResult<()>;
}

pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn step(&self, message: &str) {
        tracing::debug!(message, "plugin operation step");
    }

    fn checkpoint(&self, _stage: Checkpoint) -> PluginResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub url: String,
    pub custom_name: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub plugin_name: String,
    pub version: Option<String>,
    pub previous_version: Option<String>,
    pub outcome: HistoryOutcome,
}

/// Removes the staged download on every exit path.
struct StagedFile(PathBuf);

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

pub struct PluginManager {
    plugins_dir: PathBuf,
    staging_dir: PathBuf,
    registry: Registry,
    history: HistoryLog,
    resolver: SourceResolver,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl PluginManager {
    pub fn new(
        plugins_dir: PathBuf,
        staging_dir: PathBuf,
        registry: Registry,
        history: HistoryLog,
        resolver: SourceResolver,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            plugins_dir,
            staging_dir,
            registry,
            history,
            resolver,
            fetcher,
        }
    }

    /// File-backed manager using the configured directories.
    pub fn open(config: &AgentConfig, client: reqwest::Client) -> PluginResult<Self> {
        fs::create_dir_all(&config.plugins_dir)?;
        fs::create_dir_all(config.staging_dir())?;
        let registry = Registry::open(Box::new(JsonFileStore::<RegistryDocument>::new(
            config.registry_file(),
        )))?;
        let history = HistoryLog::new(Box::new(JsonFileStore::<Vec<HistoryEntry>>::new(
            config.history_file(),
        )));
        let resolver = SourceResolver::new(client.clone(), config);
        let fetcher = Arc::new(HttpFetcher::new(client, config.download_max_bytes));
        Ok(Self::new(
            config.plugins_dir.clone(),
            config.staging_dir(),
            registry,
            history,
            resolver,
            fetcher,
        ))
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn list(&self) -> Vec<PluginRecord> {
        self.registry.list()
    }

    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.registry.get(name)
    }

    pub async fn install(
        &self,
        req: &InstallRequest,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let res = self
            .install_from(req, None, JobAction::Install, obs)
            .await;
        if let Err(err) = &res {
            let label = req.custom_name.as_deref().unwrap_or(req.url.as_str());
            self.record_failure(JobAction::Install, label, None, err);
        }
        res
    }

    /// Re-resolves a plugin's origin and installs the result under the same name.
    pub async fn update(
        &self,
        name: &str,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let Some(record) = self.registry.get(name) else {
            let err = PluginError::plugin_not_found(name);
            self.record_failure(JobAction::Update, name, None, &err);
            return Err(err);
        };
        let res = match update_source_url(&record) {
            Some(url) => {
                obs.step(&format!("checking {url} for a newer version of {}", record.name));
                let req = InstallRequest {
                    url,
                    custom_name: None,
                    category: None,
                };
                self.install_from(&req, Some(&record.name), JobAction::Update, obs)
                    .await
            }
            None => Err(PluginError::InvalidRequest(format!(
                "{} was installed manually and has no origin to update from",
                record.name
            ))),
        };
        if let Err(err) = &res {
            self.record_failure(JobAction::Update, &record.name, Some(&record.version), err);
        }
        res
    }

    async fn install_from(
        &self,
        req: &InstallRequest,
        expected_name: Option<&str>,
        action: JobAction,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        obs.step(&format!("resolving {}", req.url));
        let resolved = self.resolver.resolve(&req.url).await?;
        let name_hint = req.custom_name.as_deref().or(expected_name);
        let artifact = match resolved.artifacts {
            ResolvedArtifacts::Single(a) => a,
            ResolvedArtifacts::Candidates { candidates } => pick_candidate(candidates, name_hint)?,
            ResolvedArtifacts::Manual { guidance } => {
                return Err(PluginError::InvalidRequest(format!(
                    "manual download required: {guidance}"
                )));
            }
        };
        obs.step(&format!(
            "resolved {} source to {} (reported version {})",
            source_label(&resolved.kind),
            artifact.filename,
            resolved.reported_version.as_deref().unwrap_or("unknown")
        ));

        obs.checkpoint(Checkpoint::PreDownload)?;
        let target_file = source::sanitize_file_name(&artifact.filename).ok_or_else(|| {
            PluginError::InvalidArchive(format!("unusable file name {:?}", artifact.filename))
        })?;
        let staged = StagedFile(
            self.staging_dir
                .join(format!("{}-{target_file}.part", crate::now_unix_ms())),
        );
        obs.step(&format!("downloading {}", artifact.url));
        let downloaded = self.fetcher.fetch(&artifact.url, &staged.0).await?;
        obs.step(&format!("downloaded {} bytes (sha1 {})", downloaded.bytes, downloaded.sha1));
        if let Some(expected) = &artifact.sha1
            && !expected.eq_ignore_ascii_case(&downloaded.sha1)
        {
            return Err(PluginError::InvalidArchive(format!(
                "sha1 mismatch for {}: expected {expected}, got {}",
                artifact.filename, downloaded.sha1
            )));
        }

        obs.step("validating archive");
        let meta = metadata::parse_file(&staged.0)?;
        obs.step(&format!(
            "found {} declaring {} {}",
            meta.manifest, meta.name, meta.version
        ));

        let name = name_hint.unwrap_or(meta.name.as_str()).trim().to_string();
        if !is_plain_name(&name) {
            return Err(PluginError::InvalidRequest(format!(
                "plugin name {name:?} cannot be used as a directory name"
            )));
        }
        let version = if meta.version == "unknown" {
            resolved
                .reported_version
                .clone()
                .unwrap_or_else(|| meta.version.clone())
        } else {
            meta.version.clone()
        };

        let existing = self.registry.get(&name);
        let outcome = match &existing {
            None => {
                obs.step(&format!("{name} is not installed yet"));
                HistoryOutcome::Installed
            }
            Some(current) => {
                let relation = VersionRelation::between(&current.version, &version);
                obs.step(&format!(
                    "{name} {} is installed; {version} is {}",
                    current.version,
                    match relation {
                        VersionRelation::Same => "the same version",
                        VersionRelation::Upgrade => "an upgrade",
                        VersionRelation::Downgrade => "a downgrade",
                    }
                ));
                match relation {
                    VersionRelation::Same => HistoryOutcome::Same,
                    VersionRelation::Upgrade => HistoryOutcome::Upgrade,
                    VersionRelation::Downgrade => HistoryOutcome::Downgrade,
                }
            }
        };
        if let Some(owner) = self
            .registry
            .list()
            .into_iter()
            .find(|p| p.file_name == target_file && !p.name.eq_ignore_ascii_case(&name))
        {
            return Err(PluginError::InvalidRequest(format!(
                "{target_file} already belongs to plugin {}",
                owner.name
            )));
        }

        obs.checkpoint(Checkpoint::PreWrite)?;
        let backup = match &existing {
            Some(current) => self.backup(current, obs)?,
            None => None,
        };

        let live_path = self.plugins_dir.join(&target_file);
        copy_atomic(&staged.0, &live_path)?;
        obs.step(&format!("wrote {}", live_path.display()));
        if let Some(current) = &existing
            && current.file_name != target_file
        {
            remove_if_exists(&self.plugins_dir.join(&current.file_name))?;
            obs.step(&format!("removed superseded {}", current.file_name));
        }

        let now = crate::now_unix_ms();
        let record = PluginRecord {
            name: existing.as_ref().map(|c| c.name.clone()).unwrap_or(name),
            version: version.clone(),
            source: resolved.kind.origin(),
            enabled: existing.as_ref().is_none_or(|c| c.enabled),
            category: req
                .category
                .clone()
                .or_else(|| existing.as_ref().map(|c| c.category.clone()))
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            description: meta.description.clone(),
            installed_at_unix_ms: existing
                .as_ref()
                .map(|c| c.installed_at_unix_ms)
                .unwrap_or(now),
            updated_at_unix_ms: now,
            file_name: target_file,
            origin_url: Some(resolved.origin_url.clone()),
            project_id: resolved.kind.project_id(),
            sha1: Some(downloaded.sha1.clone()),
            authors: meta.authors.clone(),
            depends: meta.depends.clone(),
            soft_depends: meta.soft_depends.clone(),
            backup: backup.or_else(|| existing.as_ref().and_then(|c| c.backup.clone())),
        };
        let plugin_name = record.name.clone();
        self.registry.update(|doc| {
            doc.upsert(record);
            Ok(())
        })?;
        obs.step(&format!("registered {plugin_name} {version}"));

        let previous_version = existing.map(|c| c.version);
        self.record(HistoryEntry {
            timestamp_unix_ms: now,
            action,
            plugin_name: plugin_name.clone(),
            from_version: previous_version.clone(),
            to_version: Some(version.clone()),
            outcome,
            detail: None,
        });
        tracing::info!(plugin = %plugin_name, %version, outcome = outcome.as_str(), "plugin installed");

        Ok(OperationOutcome {
            plugin_name,
            version: Some(version),
            previous_version,
            outcome,
        })
    }

    /// Copies the live artifact of `current` to its `.bak` sibling, replacing any
    /// older backup of the same plugin.
    fn backup(
        &self,
        current: &PluginRecord,
        obs: &dyn OperationObserver,
    ) -> PluginResult<Option<BackupInfo>> {
        let live = self.plugins_dir.join(&current.file_name);
        if !live.is_file() {
            obs.step(&format!(
                "{} is missing on disk; keeping the previous backup",
                current.file_name
            ));
            return Ok(None);
        }
        if let Some(old) = &current.backup
            && old.file_name != current.file_name
        {
            remove_if_exists(&self.backup_path(&old.file_name))?;
        }
        let dst = self.backup_path(&current.file_name);
        copy_atomic(&live, &dst)?;
        obs.step(&format!(
            "backed up {} {} to {}",
            current.name,
            current.version,
            dst.display()
        ));
        Ok(Some(BackupInfo {
            file_name: current.file_name.clone(),
            version: current.version.clone(),
            sha1: current.sha1.clone(),
            created_at_unix_ms: crate::now_unix_ms(),
        }))
    }

    pub fn uninstall(
        &self,
        name: &str,
        delete_configs: bool,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let res = self.uninstall_inner(name, delete_configs, obs);
        if let Err(err) = &res {
            self.record_failure(JobAction::Uninstall, name, None, err);
        }
        res
    }

    fn uninstall_inner(
        &self,
        name: &str,
        delete_configs: bool,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::plugin_not_found(name))?;
        obs.checkpoint(Checkpoint::PreWrite)?;

        remove_if_exists(&self.plugins_dir.join(&record.file_name))?;
        obs.step(&format!("removed {}", record.file_name));
        if let Some(backup) = &record.backup {
            remove_if_exists(&self.backup_path(&backup.file_name))?;
        }
        if delete_configs {
            match self.config_dir(&record.name) {
                Some(data_dir) if data_dir.is_dir() => {
                    fs::remove_dir_all(&data_dir)?;
                    obs.step(&format!("deleted configuration {}", data_dir.display()));
                }
                Some(_) => {}
                None => {
                    tracing::warn!(plugin = %record.name, "refusing to delete configuration outside the plugins directory");
                    obs.step(&format!(
                        "kept configuration of {}: name does not map to a plugins subdirectory",
                        record.name
                    ));
                }
            }
        }

        self.registry.update(|doc| {
            doc.remove(&record.name);
            Ok(())
        })?;
        obs.step(&format!("unregistered {}", record.name));

        self.record(HistoryEntry {
            timestamp_unix_ms: crate::now_unix_ms(),
            action: JobAction::Uninstall,
            plugin_name: record.name.clone(),
            from_version: Some(record.version.clone()),
            to_version: None,
            outcome: HistoryOutcome::Uninstalled,
            detail: delete_configs.then(|| "configuration deleted".to_string()),
        });
        tracing::info!(plugin = %record.name, delete_configs, "plugin uninstalled");

        Ok(OperationOutcome {
            plugin_name: record.name,
            version: None,
            previous_version: Some(record.version),
            outcome: HistoryOutcome::Uninstalled,
        })
    }

    /// Flips the registry flag only; the artifact is not moved.
    pub fn toggle(
        &self,
        name: &str,
        enabled: bool,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let action = if enabled {
            JobAction::Enable
        } else {
            JobAction::Disable
        };
        let res = self.toggle_inner(name, enabled, action, obs);
        if let Err(err) = &res {
            self.record_failure(action, name, None, err);
        }
        res
    }

    fn toggle_inner(
        &self,
        name: &str,
        enabled: bool,
        action: JobAction,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let record = self.registry.update(|doc| {
            let record = doc
                .find_mut(name)
                .ok_or_else(|| PluginError::plugin_not_found(name))?;
            record.enabled = enabled;
            record.updated_at_unix_ms = crate::now_unix_ms();
            Ok(record.clone())
        })?;
        let outcome = if enabled {
            HistoryOutcome::Enabled
        } else {
            HistoryOutcome::Disabled
        };
        obs.step(&format!("{} is now {}", record.name, outcome.as_str()));

        self.record(HistoryEntry {
            timestamp_unix_ms: crate::now_unix_ms(),
            action,
            plugin_name: record.name.clone(),
            from_version: None,
            to_version: Some(record.version.clone()),
            outcome,
            detail: None,
        });

        Ok(OperationOutcome {
            plugin_name: record.name,
            version: Some(record.version),
            previous_version: None,
            outcome,
        })
    }

    /// Restores the retained backup as the live artifact. The backup stays on disk.
    pub fn rollback(
        &self,
        name: &str,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let res = self.rollback_inner(name, obs);
        if let Err(err) = &res {
            self.record_failure(JobAction::Rollback, name, None, err);
        }
        res
    }

    fn rollback_inner(
        &self,
        name: &str,
        obs: &dyn OperationObserver,
    ) -> PluginResult<OperationOutcome> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::plugin_not_found(name))?;
        let backup = record
            .backup
            .clone()
            .ok_or_else(|| PluginError::NoBackupAvailable(record.name.clone()))?;
        let backup_path = self.backup_path(&backup.file_name);
        if !backup_path.is_file() {
            return Err(PluginError::NoBackupAvailable(record.name.clone()));
        }
        obs.checkpoint(Checkpoint::PreWrite)?;

        copy_atomic(&backup_path, &self.plugins_dir.join(&backup.file_name))?;
        if record.file_name != backup.file_name {
            remove_if_exists(&self.plugins_dir.join(&record.file_name))?;
        }
        obs.step(&format!(
            "restored {} {} from {}",
            record.name,
            backup.version,
            backup_path.display()
        ));

        self.registry.update(|doc| {
            let r = doc
                .find_mut(&record.name)
                .ok_or_else(|| PluginError::plugin_not_found(&record.name))?;
            r.version = backup.version.clone();
            r.file_name = backup.file_name.clone();
            r.sha1 = backup.sha1.clone();
            r.updated_at_unix_ms = crate::now_unix_ms();
            Ok(())
        })?;

        self.record(HistoryEntry {
            timestamp_unix_ms: crate::now_unix_ms(),
            action: JobAction::Rollback,
            plugin_name: record.name.clone(),
            from_version: Some(record.version.clone()),
            to_version: Some(backup.version.clone()),
            outcome: HistoryOutcome::Rolledback,
            detail: None,
        });
        tracing::info!(plugin = %record.name, from = %record.version, to = %backup.version, "plugin rolled back");

        Ok(OperationOutcome {
            plugin_name: record.name,
            version: Some(backup.version),
            previous_version: Some(record.version),
            outcome: HistoryOutcome::Rolledback,
        })
    }

    /// Registers jars found in the plugins directory that the registry does not
    /// know about. Unreadable jars are skipped.
    pub fn scan_unmanaged(&self) -> PluginResult<Vec<PluginRecord>> {
        let known = self.registry.list();
        let mut found = Vec::new();
        let entries = match fs::read_dir(&self.plugins_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if !path.is_file() || !file_name.to_ascii_lowercase().ends_with(".jar") {
                continue;
            }
            if known.iter().any(|p| p.file_name == file_name) {
                continue;
            }
            let meta = match metadata::parse_file(&path) {
                Ok(m) => m,
                Err(err) => {
                    tracing::debug!(file = %file_name, %err, "skipping unreadable jar");
                    continue;
                }
            };
            if !is_plain_name(&meta.name) {
                tracing::warn!(file = %file_name, name = %meta.name, "skipping jar whose plugin name is not a plain directory name");
                continue;
            }
            if known.iter().any(|p| p.name.eq_ignore_ascii_case(&meta.name))
                || found
                    .iter()
                    .any(|p: &PluginRecord| p.name.eq_ignore_ascii_case(&meta.name))
            {
                continue;
            }
            let sha1 = fs::read(&path).ok().map(|b| crate::fetch::sha1_hex(&b));
            let now = crate::now_unix_ms();
            found.push(PluginRecord {
                name: meta.name,
                version: meta.version,
                source: PluginSource::Manual,
                enabled: true,
                category: DEFAULT_CATEGORY.to_string(),
                description: meta.description,
                installed_at_unix_ms: now,
                updated_at_unix_ms: now,
                file_name,
                origin_url: None,
                project_id: None,
                sha1,
                authors: meta.authors,
                depends: meta.depends,
                soft_depends: meta.soft_depends,
                backup: None,
            });
        }
        if !found.is_empty() {
            let added = found.clone();
            self.registry.update(|doc| {
                for record in added {
                    doc.upsert(record);
                }
                Ok(())
            })?;
            tracing::info!(count = found.len(), "registered unmanaged plugins");
        }
        Ok(found)
    }

    /// The plugin's data directory, only when it sits directly under the
    /// plugins directory.
    fn config_dir(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_name(name) {
            return None;
        }
        let dir = self.plugins_dir.join(name);
        (dir.parent() == Some(self.plugins_dir.as_path())).then_some(dir)
    }

    fn backup_path(&self, file_name: &str) -> PathBuf {
        self.plugins_dir.join(format!("{file_name}.bak"))
    }

    fn record(&self, entry: HistoryEntry) {
        if let Err(err) = self.history.append(entry) {
            tracing::warn!(%err, "failed to append plugin history");
        }
    }

    fn record_failure(
        &self,
        action: JobAction,
        plugin_name: &str,
        from_version: Option<&str>,
        err: &PluginError,
    ) {
        if matches!(err, PluginError::Cancelled) {
            return;
        }
        self.record(HistoryEntry {
            timestamp_unix_ms: crate::now_unix_ms(),
            action,
            plugin_name: plugin_name.to_string(),
            from_version: from_version.map(str::to_string),
            to_version: None,
            outcome: HistoryOutcome::Failed,
            detail: Some(err.to_string()),
        });
    }
}

/// URL to re-resolve when updating. Pinned GitHub tags and Modrinth versions
/// are widened to "latest".
fn update_source_url(record: &PluginRecord) -> Option<String> {
    match (record.source, record.project_id.as_deref()) {
        (PluginSource::Manual, _) => None,
        (PluginSource::Github, Some(repo)) => {
            Some(format!("https://github.com/{repo}/releases/latest"))
        }
        (PluginSource::Modrinth, Some(slug)) => Some(format!("https://modrinth.com/plugin/{slug}")),
        _ => record.origin_url.clone(),
    }
}

fn source_label(kind: &SourceKind) -> &'static str {
    match kind {
        SourceKind::Direct { .. } => "direct",
        SourceKind::GithubLatest { .. } => "github latest release",
        SourceKind::GithubTag { .. } => "github tagged release",
        SourceKind::Modrinth { .. } => "modrinth",
        SourceKind::ManualOnly { .. } => "manual",
    }
}

/// Chooses among several release assets: the first name match, else a single
/// server-platform match.
fn pick_candidate(candidates: Vec<Artifact>, name_hint: Option<&str>) -> PluginResult<Artifact> {
    let lower = |a: &Artifact| a.filename.to_ascii_lowercase();
    if let Some(hint) = name_hint.map(|h| h.to_ascii_lowercase())
        && let Some(found) = candidates.iter().find(|a| lower(a).contains(&hint))
    {
        return Ok(found.clone());
    }
    let platform: Vec<&Artifact> = candidates
        .iter()
        .filter(|a| PLATFORM_HINTS.iter().any(|p| lower(a).contains(p)))
        .collect();
    if let [only] = platform.as_slice() {
        return Ok((*only).clone());
    }
    Err(PluginError::NoCompatibleArtifact(format!(
        "release has several artifacts, pick one and submit its direct link: {}",
        candidates
            .iter()
            .map(|a| a.filename.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// A name usable as a single directory component under the plugins directory.
fn is_plain_name(name: &str) -> bool {
    source::sanitize_file_name(name).as_deref() == Some(name)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
