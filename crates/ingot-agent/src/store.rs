use std::{
    fs,
    io::Write,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::PluginResult;

/// Whole-document persistence. Every save replaces the entire document, so a
/// concurrent reader sees either the previous or the next version.
pub trait DocumentStore<T>: Send + Sync {
    fn load(&self) -> PluginResult<Option<T>>;
    fn save(&self, doc: &T) -> PluginResult<()>;
}

/// JSON file written via temp file + fsync + rename.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }
}

impl<T> DocumentStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> PluginResult<Option<T>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, doc: &T) -> PluginResult<()> {
        let data = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

/// In-process store for tests and ephemeral setups.
pub struct MemoryStore<T> {
    doc: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new(initial: Option<T>) -> Self {
        Self {
            doc: Mutex::new(initial),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> PluginResult<Option<T>> {
        Ok(self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, doc: &T) -> PluginResult<()> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = Some(doc.clone());
        Ok(())
    }
}

/// Writes `data` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let res = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

/// Copies `src` over `dst` through a temp file so `dst` is never half-written.
pub fn copy_atomic(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(dst);
    let res = (|| {
        fs::copy(src, &tmp)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, dst)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        items: Vec<String>,
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::<Doc>::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_replaces_whole_document_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let store = JsonFileStore::<Doc>::new(&path);

        store
            .save(&Doc {
                items: vec!["a".into(), "b".into()],
            })
            .unwrap();
        store
            .save(&Doc {
                items: vec!["c".into()],
            })
            .unwrap();

        assert_eq!(
            store.load().unwrap(),
            Some(Doc {
                items: vec!["c".into()]
            })
        );
        assert!(!dir.path().join("nested").join("doc.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = JsonFileStore::<Doc>::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn copy_atomic_overwrites_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jar");
        let dst = dir.path().join("b.jar");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();
        copy_atomic(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert_eq!(fs::read(&src).unwrap(), b"new");
    }
}
