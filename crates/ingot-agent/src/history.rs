use std::sync::Mutex;

use ingot_jobs::JobAction;

use crate::{error::PluginResult, store::DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOutcome {
    Installed,
    Upgrade,
    Downgrade,
    Same,
    Uninstalled,
    Enabled,
    Disabled,
    Rolledback,
    Failed,
}

impl HistoryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryOutcome::Installed => "installed",
            HistoryOutcome::Upgrade => "upgrade",
            HistoryOutcome::Downgrade => "downgrade",
            HistoryOutcome::Same => "same",
            HistoryOutcome::Uninstalled => "uninstalled",
            HistoryOutcome::Enabled => "enabled",
            HistoryOutcome::Disabled => "disabled",
            HistoryOutcome::Rolledback => "rolledback",
            HistoryOutcome::Failed => "failed",
        }
    }
}

/// Immutable audit record of one Plugin Manager operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp_unix_ms: u64,
    pub action: JobAction,
    pub plugin_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    pub outcome: HistoryOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append-only history file. Entries are never edited or removed.
pub struct HistoryLog {
    store: Box<dyn DocumentStore<Vec<HistoryEntry>>>,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(store: Box<dyn DocumentStore<Vec<HistoryEntry>>>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, entry: HistoryEntry) -> PluginResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.store.load()?.unwrap_or_default();
        entries.push(entry);
        self.store.save(&entries)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> PluginResult<Vec<HistoryEntry>> {
        let entries = self.store.load()?.unwrap_or_default();
        Ok(entries.into_iter().rev().take(limit).collect())
    }

    pub fn for_plugin(&self, name: &str) -> PluginResult<Vec<HistoryEntry>> {
        let entries = self.store.load()?.unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter(|e| e.plugin_name.eq_ignore_ascii_case(name))
            .collect())
    }
}
