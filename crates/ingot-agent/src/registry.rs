use std::sync::Mutex;

use crate::{
    error::{PluginError, PluginResult},
    source::PluginSource,
    store::DocumentStore,
};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub source: PluginSource,
    pub enabled: bool,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    pub installed_at_unix_ms: u64,
    #[serde(default)]
    pub updated_at_unix_ms: u64,
    /// Live artifact, relative to the plugins directory.
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    /// `owner/repo` for GitHub, slug for Modrinth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub soft_depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub plugins: Vec<PluginRecord>,
}

impl RegistryDocument {
    pub fn find(&self, name: &str) -> Option<&PluginRecord> {
        self.plugins
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.plugins
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Inserts or replaces the record with the same (case-insensitive) name.
    pub fn upsert(&mut self, record: PluginRecord) {
        match self.find_mut(&record.name) {
            Some(existing) => *existing = record,
            None => self.plugins.push(record),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginRecord> {
        let idx = self
            .plugins
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.plugins.remove(idx))
    }

    fn check_unique(&self) -> PluginResult<()> {
        for (i, p) in self.plugins.iter().enumerate() {
            if self.plugins[..i]
                .iter()
                .any(|q| q.name.eq_ignore_ascii_case(&p.name))
            {
                return Err(PluginError::RegistryWriteConflict(format!(
                    "duplicate plugin name {}",
                    p.name
                )));
            }
        }
        Ok(())
    }
}

/// Installed-plugin registry. Every change rewrites the whole document.
pub struct Registry {
    store: Box<dyn DocumentStore<RegistryDocument>>,
    doc: Mutex<RegistryDocument>,
}

impl Registry {
    pub fn open(store: Box<dyn DocumentStore<RegistryDocument>>) -> PluginResult<Self> {
        let doc = store.load()?.unwrap_or_default();
        doc.check_unique()?;
        Ok(Self {
            store,
            doc: Mutex::new(doc),
        })
    }

    pub fn list(&self) -> Vec<PluginRecord> {
        let mut plugins = self.lock().plugins.clone();
        plugins.sort_by_key(|p| p.name.to_ascii_lowercase());
        plugins
    }

    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.lock().find(name).cloned()
    }

    /// Read-modify-write of the whole registry. The closure works on a copy;
    /// memory is only updated once the new document is on disk.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut RegistryDocument) -> PluginResult<R>,
    ) -> PluginResult<R> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        next.check_unique()?;
        self.store.save(&next)?;
        *guard = next;
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;

    pub(crate) fn record(name: &str, version: &str) -> PluginRecord {
        PluginRecord {
            name: name.to_string(),
            version: version.to_string(),
            source: PluginSource::DirectUrl,
            enabled: true,
            category: "general".to_string(),
            description: None,
            installed_at_unix_ms: 1,
            updated_at_unix_ms: 1,
            file_name: format!("{name}-{version}.jar"),
            origin_url: None,
            project_id: None,
            sha1: None,
            authors: vec![],
            depends: vec![],
            soft_depends: vec![],
            backup: None,
        }
    }

    #[test]
    fn upsert_replaces_case_insensitively() {
        let reg = Registry::open(Box::new(MemoryStore::<RegistryDocument>::default())).unwrap();
        reg.update(|doc| {
            doc.upsert(record("Essentials", "1.0.0"));
            Ok(())
        })
        .unwrap();
        reg.update(|doc| {
            doc.upsert(record("essentials", "2.0.0"));
            Ok(())
        })
        .unwrap();
        let all = reg.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, "2.0.0");
    }

    #[test]
    fn failed_update_leaves_registry_untouched() {
        let reg = Registry::open(Box::new(MemoryStore::<RegistryDocument>::default())).unwrap();
        reg.update(|doc| {
            doc.upsert(record("Vault", "1.7.3"));
            Ok(())
        })
        .unwrap();

        let res: PluginResult<()> = reg.update(|doc| {
            doc.find_mut("Vault").unwrap().version = "9.9.9".into();
            Err(PluginError::InvalidRequest("nope".into()))
        });
        assert!(res.is_err());
        assert_eq!(reg.get("vault").unwrap().version, "1.7.3");
    }

    #[test]
    fn duplicate_names_are_a_write_conflict() {
        let reg = Registry::open(Box::new(MemoryStore::<RegistryDocument>::default())).unwrap();
        let err = reg
            .update(|doc| {
                doc.plugins.push(record("A", "1"));
                doc.plugins.push(record("a", "2"));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, PluginError::RegistryWriteConflict(_)));
        assert!(reg.list().is_empty());
    }

    #[test]
    fn registry_file_uses_plugins_wrapper() {
        let doc = RegistryDocument {
            plugins: vec![record("Vault", "1.7.3")],
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["plugins"][0]["name"], "Vault");
        assert_eq!(json["plugins"][0]["source"], "direct-url");
        assert_eq!(json["plugins"][0]["installedAtUnixMs"], 1);
    }
}
