//! In-memory cloud backend.
//!
//! Projects are partitioned by owner. A failure can be injected to exercise
//! the gateway's local fallback.

use super::{
    BoxFuture, CloudStorage, ProjectMeta, ProjectRecord, StorageError, StorageResult, stamp_save,
};
use crate::version::now_millis;
use std::collections::HashMap;
use std::sync::RwLock;

type OwnerKey = (String, String);

#[derive(Default)]
pub struct MemoryCloudStorage {
    projects: RwLock<HashMap<OwnerKey, ProjectRecord>>,
    failure: RwLock<Option<StorageError>>,
}

impl MemoryCloudStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<StorageError>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = error;
        }
    }

    /// Number of projects stored for `owner`.
    pub fn project_count(&self, owner: &str) -> usize {
        self.projects
            .read()
            .map(|p| p.keys().filter(|(o, _)| o == owner).count())
            .unwrap_or(0)
    }

    fn check(&self) -> StorageResult<()> {
        match self.failure.read() {
            Ok(failure) => match failure.as_ref() {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            },
            Err(e) => Err(StorageError::Other(format!("Lock error: {}", e))),
        }
    }
}

fn key(owner: &str, project_id: &str) -> OwnerKey {
    (owner.to_string(), project_id.to_string())
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl CloudStorage for MemoryCloudStorage {
    fn save(&self, owner: &str, record: &ProjectRecord) -> BoxFuture<'_, StorageResult<u64>> {
        let key = key(owner, &record.meta.id);
        let record = record.clone();
        Box::pin(async move {
            self.check()?;
            let mut projects = self.projects.write().map_err(lock_error)?;
            let stored = stamp_save(projects.get(&key), &record);
            let version = stored.version();
            projects.insert(key, stored);
            Ok(version)
        })
    }

    fn load(&self, owner: &str, project_id: &str) -> BoxFuture<'_, StorageResult<ProjectRecord>> {
        let key = key(owner, project_id);
        Box::pin(async move {
            self.check()?;
            let projects = self.projects.read().map_err(lock_error)?;
            projects
                .get(&key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.1.clone()))
        })
    }

    fn delete(&self, owner: &str, project_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key(owner, project_id);
        Box::pin(async move {
            self.check()?;
            let mut projects = self.projects.write().map_err(lock_error)?;
            projects.remove(&key);
            Ok(())
        })
    }

    fn rename(&self, owner: &str, project_id: &str, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key(owner, project_id);
        let name = name.to_string();
        Box::pin(async move {
            self.check()?;
            let mut projects = self.projects.write().map_err(lock_error)?;
            let record = projects
                .get_mut(&key)
                .ok_or_else(|| StorageError::NotFound(key.1.clone()))?;
            record.meta.name = name;
            record.meta.updated_at = now_millis();
            Ok(())
        })
    }

    fn list(&self, owner: &str) -> BoxFuture<'_, StorageResult<Vec<ProjectMeta>>> {
        let owner = owner.to_string();
        Box::pin(async move {
            self.check()?;
            let projects = self.projects.read().map_err(lock_error)?;
            Ok(projects
                .iter()
                .filter(|((o, _), _)| *o == owner)
                .map(|(_, r)| r.meta.clone())
                .collect())
        })
    }
}
