//! In-memory storage implementation.

use super::{
    BoxFuture, LAST_PROJECT_KEY, ProjectMeta, ProjectRecord, Storage, StorageError, StorageResult,
    stamp_save,
};
use crate::version::now_millis;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl Storage for MemoryStorage {
    fn save(&self, key: &str, record: &ProjectRecord) -> BoxFuture<'_, StorageResult<u64>> {
        let key = key.to_string();
        let record = record.clone();
        Box::pin(async move {
            let mut projects = self.projects.write().map_err(lock_error)?;
            let stored = stamp_save(projects.get(&key), &record);
            let version = stored.version();
            projects.insert(key, stored);
            Ok(version)
        })
    }

    fn load(&self, key: &str) -> BoxFuture<'_, StorageResult<ProjectRecord>> {
        let key = key.to_string();
        Box::pin(async move {
            let projects = self.projects.read().map_err(lock_error)?;
            projects
                .get(&key)
                .cloned()
                .ok_or(StorageError::NotFound(key))
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut projects = self.projects.write().map_err(lock_error)?;
            projects.remove(&key);
            Ok(())
        })
    }

    fn rename(&self, key: &str, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let mut projects = self.projects.write().map_err(lock_error)?;
            let record = projects
                .get_mut(&key)
                .ok_or_else(|| StorageError::NotFound(key.clone()))?;
            record.meta.name = name;
            record.meta.updated_at = now_millis();
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<ProjectMeta>>> {
        Box::pin(async move {
            let projects = self.projects.read().map_err(lock_error)?;
            Ok(projects
                .iter()
                .filter(|(key, _)| key.as_str() != LAST_PROJECT_KEY)
                .map(|(_, r)| r.meta.clone())
                .collect())
        })
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let projects = self.projects.read().map_err(lock_error)?;
            Ok(projects.contains_key(&key))
        })
    }
}
