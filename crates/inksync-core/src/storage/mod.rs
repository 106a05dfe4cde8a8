//! Storage abstraction for project snapshots.
//!
//! Each project is stored as two records: [`ProjectMeta`] (name, viewport,
//! frame count) and [`ProjectElements`] (the serialized document plus its
//! [`ProjectVersion`](ProjectElements::version)). Stores bump the version on
//! every successful save.

mod cloud;
mod file;
mod memory;

pub use cloud::MemoryCloudStorage;
pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::canvas::Document;
use crate::element::Element;
use crate::version::now_millis;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Key under which the most recently saved project is mirrored locally.
/// Not usable as a project id.
pub const LAST_PROJECT_KEY: &str = "__last_project__";

/// Storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Project not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Backend unavailable: {0}")]
    Backend(String),
    #[error("Reserved key: {0}")]
    Reserved(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Camera state saved with a project.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// Project metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub frame_count: usize,
    /// Unix milliseconds.
    pub updated_at: u64,
}

/// Project elements record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectElements {
    /// Elements back to front.
    pub elements: Vec<Element>,
    /// Unix milliseconds.
    pub updated_at: u64,
    /// Project version, incremented by the store on every save.
    pub version: u64,
}

/// Both durable records of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub meta: ProjectMeta,
    pub elements: ProjectElements,
}

impl ProjectRecord {
    /// Snapshot a document. The version is assigned by the store.
    pub fn from_document(project_id: &str, document: &Document, viewport: Viewport) -> Self {
        let now = now_millis();
        Self {
            meta: ProjectMeta {
                id: project_id.to_string(),
                name: document.name.clone(),
                viewport,
                frame_count: document.frame_count(),
                updated_at: now,
            },
            elements: ProjectElements {
                elements: document.to_elements(),
                updated_at: now,
                version: 0,
            },
        }
    }

    /// Rebuild the document. Duplicate ids collapse to the newest copy.
    pub fn to_document(&self) -> Document {
        Document::from_elements(
            self.meta.id.clone(),
            self.meta.name.clone(),
            self.elements.elements.clone(),
        )
    }

    pub fn version(&self) -> u64 {
        self.elements.version
    }
}

/// Apply a save on top of what a store already holds: version bumps by one.
pub(crate) fn stamp_save(existing: Option<&ProjectRecord>, record: &ProjectRecord) -> ProjectRecord {
    let mut stored = record.clone();
    stored.elements.version = existing.map(|r| r.elements.version).unwrap_or(0) + 1;
    stored
}

/// Local-only project store. Must never require network access.
pub trait Storage: Send + Sync {
    /// Save a project under `key`. Returns the new project version.
    fn save(&self, key: &str, record: &ProjectRecord) -> BoxFuture<'_, StorageResult<u64>>;

    /// Load a project.
    fn load(&self, key: &str) -> BoxFuture<'_, StorageResult<ProjectRecord>>;

    /// Delete a project. Deleting a missing project is not an error.
    fn delete(&self, key: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// Rename a project.
    fn rename(&self, key: &str, name: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// Metadata of every stored project.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<ProjectMeta>>>;

    /// Check if a project exists.
    fn exists(&self, key: &str) -> BoxFuture<'_, StorageResult<bool>>;
}

/// Authenticated remote project store. `owner` is the verified subject of
/// the caller's credential.
pub trait CloudStorage: Send + Sync {
    fn save(&self, owner: &str, record: &ProjectRecord) -> BoxFuture<'_, StorageResult<u64>>;

    fn load(&self, owner: &str, project_id: &str) -> BoxFuture<'_, StorageResult<ProjectRecord>>;

    fn delete(&self, owner: &str, project_id: &str) -> BoxFuture<'_, StorageResult<()>>;

    fn rename(&self, owner: &str, project_id: &str, name: &str) -> BoxFuture<'_, StorageResult<()>>;

    fn list(&self, owner: &str) -> BoxFuture<'_, StorageResult<Vec<ProjectMeta>>>;
}

/// Minimal executor for driving storage futures in tests.
#[cfg(test)]
pub(crate) fn block_on<F: std::future::Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    #[test]
    fn test_record_roundtrip_keeps_dangling_parent_unresolved() {
        let mut doc = Document::new();
        doc.name = "Board".to_string();
        let frame = Element::frame("F", Point::ZERO, 10.0, 10.0);
        let mut child = Element::rectangle(Point::ZERO, 1.0, 1.0);
        child.parent_id = Some(frame.id);
        let child_id = child.id;
        doc.add_element(frame);
        doc.add_element(child);

        let mut record = ProjectRecord::from_document("p1", &doc, Viewport::default());
        assert_eq!(record.meta.frame_count, 1);
        assert_eq!(record.meta.name, "Board");

        // Drop the frame from the stored elements, leaving the child dangling
        record.elements.elements.retain(|el| !el.is_frame());
        let restored = record.to_document();
        assert_eq!(restored.id, "p1");
        assert!(restored.get(child_id).unwrap().parent_id.is_some());
        assert_eq!(restored.resolved_parent(child_id), None);
    }

    #[test]
    fn test_stamp_save_increments() {
        let record = ProjectRecord::from_document("p", &Document::new(), Viewport::default());
        let first = stamp_save(None, &record);
        assert_eq!(first.version(), 1);
        let second = stamp_save(Some(&first), &record);
        assert_eq!(second.version(), 2);
    }
}
