//! File-based local storage.
//!
//! Each project is two JSON files in the base directory:
//! `<key>.meta.json` and `<key>.elements.json`, with the key escaped by
//! [`FileStorage::safe_key`].

use super::{
    BoxFuture, LAST_PROJECT_KEY, ProjectElements, ProjectMeta, ProjectRecord, Storage,
    StorageError, StorageResult, stamp_save,
};
use crate::version::now_millis;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

const META_SUFFIX: &str = ".meta.json";
const ELEMENTS_SUFFIX: &str = ".elements.json";

/// File-based storage for native platforms.
pub struct FileStorage {
    /// Base directory for project storage.
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create file storage in the default location.
    ///
    /// On Unix: `~/.local/share/inksync/projects/`
    /// On Windows: `%LOCALAPPDATA%\inksync\projects\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;

        Self::new(base.join("inksync").join("projects"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File stem for a key. ASCII letters, digits and `-` pass through;
    /// every other byte becomes `_XX` in hex, so distinct keys never share
    /// a file.
    fn safe_key(key: &str) -> String {
        let mut out = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                out.push(byte as char);
            } else {
                out.push_str(&format!("_{byte:02X}"));
            }
        }
        out
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", Self::safe_key(key), META_SUFFIX))
    }

    fn elements_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", Self::safe_key(key), ELEMENTS_SUFFIX))
    }

    fn read_record(&self, key: &str) -> StorageResult<ProjectRecord> {
        let meta_path = self.meta_path(key);
        let elements_path = self.elements_path(key);
        if !meta_path.exists() || !elements_path.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(ProjectRecord {
            meta: read_json(&meta_path)?,
            elements: read_json::<ProjectElements>(&elements_path)?,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let json = fs::read_to_string(path)
        .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&json).map_err(|e| {
        StorageError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    fs::write(path, json)
        .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    if path.exists() {
        fs::remove_file(path)
            .map_err(|e| StorageError::Io(format!("Failed to delete {}: {}", path.display(), e)))?;
    }
    Ok(())
}

impl Storage for FileStorage {
    fn save(&self, key: &str, record: &ProjectRecord) -> BoxFuture<'_, StorageResult<u64>> {
        let key = key.to_string();
        let record = record.clone();
        Box::pin(async move {
            let existing = match self.read_record(&key) {
                Ok(r) => Some(r),
                Err(StorageError::NotFound(_)) => None,
                Err(e) => {
                    log::warn!("Overwriting unreadable project {}: {}", key, e);
                    None
                }
            };
            let stored = stamp_save(existing.as_ref(), &record);
            // Elements first: a crash between the writes leaves stale metadata,
            // never metadata pointing at missing elements.
            write_json(&self.elements_path(&key), &stored.elements)?;
            write_json(&self.meta_path(&key), &stored.meta)?;
            Ok(stored.version())
        })
    }

    fn load(&self, key: &str) -> BoxFuture<'_, StorageResult<ProjectRecord>> {
        let key = key.to_string();
        Box::pin(async move { self.read_record(&key) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let meta_path = self.meta_path(key);
        let elements_path = self.elements_path(key);
        Box::pin(async move {
            remove_if_exists(&meta_path)?;
            remove_if_exists(&elements_path)
        })
    }

    fn rename(&self, key: &str, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let path = self.meta_path(&key);
            if !path.exists() {
                return Err(StorageError::NotFound(key));
            }
            let mut meta: ProjectMeta = read_json(&path)?;
            meta.name = name;
            meta.updated_at = now_millis();
            write_json(&path, &meta)
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<ProjectMeta>>> {
        let base = self.base_path.clone();
        let last_meta = format!("{}{}", Self::safe_key(LAST_PROJECT_KEY), META_SUFFIX);
        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries = fs::read_dir(&base)
                .map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

            let mut metas = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(META_SUFFIX) && n != last_meta)
                    .unwrap_or(false);
                if !is_meta {
                    continue;
                }
                match read_json::<ProjectMeta>(&path) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => log::warn!("Skipping unreadable metadata: {}", e),
                }
            }
            Ok(metas)
        })
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.meta_path(key);
        Box::pin(async move { Ok(path.exists()) })
    }
}
