//! Persistence gateway: one entry point for snapshot reads and writes.
//!
//! Without a credential everything goes to the local store. With one, the
//! credential is validated and the cloud backend is tried first; any cloud
//! failure falls back to the local store and the outcome is marked
//! [`Origin::Degraded`]. Only a failure of the local store is an error.

use crate::canvas::Document;
use crate::config::DEFAULT_REQUIRED_ROLE;
use crate::credential::{self, CredentialError};
use crate::storage::{
    BoxFuture, CloudStorage, LAST_PROJECT_KEY, ProjectMeta, ProjectRecord, Storage, StorageError,
    StorageResult, Viewport,
};
use std::sync::Arc;
use thiserror::Error;

/// Receives a rendered preview after a cloud save. Failures never fail the save.
pub trait ThumbnailSink: Send + Sync {
    fn upload(&self, owner: &str, project_id: &str, document: &Document) -> BoxFuture<'_, StorageResult<()>>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Local store failed: {0}")]
    Local(#[from] StorageError),
    #[error("Cloud unavailable ({cloud}) and local store failed: {local}")]
    Both { cloud: String, local: StorageError },
}

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Cloud,
    Local,
    /// The cloud path failed and the local store answered instead.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Outcome<T> {
    fn new(value: T, origin: Origin) -> Self {
        Self { value, origin }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.origin, Origin::Degraded { .. })
    }

    /// True when the value came from the shared cloud store, the only place
    /// whose version numbers mean anything to other peers.
    pub fn is_shared(&self) -> bool {
        self.origin == Origin::Cloud
    }
}

fn check_project_id(project_id: &str) -> Result<(), GatewayError> {
    if project_id == LAST_PROJECT_KEY {
        return Err(StorageError::Reserved(project_id.to_string()).into());
    }
    Ok(())
}

enum Route {
    Local,
    Cloud { cloud: Arc<dyn CloudStorage>, owner: String },
    Rejected(CredentialError),
}

pub struct PersistenceGateway {
    local: Arc<dyn Storage>,
    cloud: Option<Arc<dyn CloudStorage>>,
    credential: Option<String>,
    required_role: String,
    thumbnails: Option<Arc<dyn ThumbnailSink>>,
}

impl PersistenceGateway {
    /// Local-only gateway.
    pub fn new(local: Arc<dyn Storage>) -> Self {
        Self {
            local,
            cloud: None,
            credential: None,
            required_role: DEFAULT_REQUIRED_ROLE.to_string(),
            thumbnails: None,
        }
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudStorage>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_required_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = role.into();
        self
    }

    pub fn with_thumbnails(mut self, sink: Arc<dyn ThumbnailSink>) -> Self {
        self.thumbnails = Some(sink);
        self
    }

    /// Set or clear the bearer token used for cloud access.
    pub fn set_credential(&mut self, token: Option<String>) {
        self.credential = token;
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    fn route(&self) -> Route {
        let (Some(cloud), Some(token)) = (&self.cloud, &self.credential) else {
            return Route::Local;
        };
        match credential::validate(token, &self.required_role, credential::now_secs()) {
            Ok(claims) => Route::Cloud {
                cloud: Arc::clone(cloud),
                owner: claims.sub,
            },
            Err(e) => Route::Rejected(e),
        }
    }

    /// Save a snapshot of `document`. Returns the new project version.
    pub async fn save(
        &self,
        project_id: &str,
        document: &Document,
        viewport: Viewport,
    ) -> Result<Outcome<u64>, GatewayError> {
        check_project_id(project_id)?;
        let record = ProjectRecord::from_document(project_id, document, viewport);
        let reason = match self.route() {
            Route::Local => {
                let version = self.save_local(&record).await?;
                return Ok(Outcome::new(version, Origin::Local));
            }
            Route::Rejected(e) => e.to_string(),
            Route::Cloud { cloud, owner } => match cloud.save(&owner, &record).await {
                Ok(version) => {
                    if let Err(e) = self.save_local(&record).await {
                        log::warn!("Local mirror of {} failed: {}", project_id, e);
                    }
                    self.upload_thumbnail(&owner, project_id, document).await;
                    return Ok(Outcome::new(version, Origin::Cloud));
                }
                Err(e) => e.to_string(),
            },
        };

        log::warn!("Cloud save of {} failed, saving locally: {}", project_id, reason);
        match self.save_local(&record).await {
            Ok(version) => Ok(Outcome::new(version, Origin::Degraded { reason })),
            Err(local) => Err(GatewayError::Both { cloud: reason, local }),
        }
    }

    /// Load a project, cloud first when authenticated.
    pub async fn load(&self, project_id: &str) -> Result<Outcome<ProjectRecord>, GatewayError> {
        check_project_id(project_id)?;
        let reason = match self.route() {
            Route::Local => {
                let record = self.local.load(project_id).await?;
                return Ok(Outcome::new(record, Origin::Local));
            }
            Route::Rejected(e) => e.to_string(),
            Route::Cloud { cloud, owner } => match cloud.load(&owner, project_id).await {
                Ok(record) => return Ok(Outcome::new(record, Origin::Cloud)),
                Err(e) => e.to_string(),
            },
        };

        log::warn!("Cloud load of {} failed, reading local copy: {}", project_id, reason);
        match self.local.load(project_id).await {
            Ok(record) => Ok(Outcome::new(record, Origin::Degraded { reason })),
            Err(local) => Err(GatewayError::Both { cloud: reason, local }),
        }
    }

    /// Delete a project everywhere it is stored.
    pub async fn delete(&self, project_id: &str) -> Result<Outcome<()>, GatewayError> {
        check_project_id(project_id)?;
        let origin = match self.route() {
            Route::Local => Origin::Local,
            Route::Rejected(e) => Origin::Degraded { reason: e.to_string() },
            Route::Cloud { cloud, owner } => match cloud.delete(&owner, project_id).await {
                Ok(()) => Origin::Cloud,
                Err(e) => Origin::Degraded { reason: e.to_string() },
            },
        };
        if let Origin::Degraded { reason } = &origin {
            log::warn!("Cloud delete of {} failed: {}", project_id, reason);
        }
        // The local copy goes too, otherwise an offline restart resurrects it.
        self.local.delete(project_id).await?;
        Ok(Outcome::new((), origin))
    }

    /// Rename a project everywhere it is stored.
    pub async fn rename(&self, project_id: &str, name: &str) -> Result<Outcome<()>, GatewayError> {
        check_project_id(project_id)?;
        let reason = match self.route() {
            Route::Local => {
                self.local.rename(project_id, name).await?;
                return Ok(Outcome::new((), Origin::Local));
            }
            Route::Rejected(e) => e.to_string(),
            Route::Cloud { cloud, owner } => match cloud.rename(&owner, project_id, name).await {
                Ok(()) => {
                    match self.local.rename(project_id, name).await {
                        Ok(()) | Err(StorageError::NotFound(_)) => {}
                        Err(e) => log::warn!("Local rename of {} failed: {}", project_id, e),
                    }
                    return Ok(Outcome::new((), Origin::Cloud));
                }
                Err(e) => e.to_string(),
            },
        };

        log::warn!("Cloud rename of {} failed, renaming locally: {}", project_id, reason);
        match self.local.rename(project_id, name).await {
            Ok(()) => Ok(Outcome::new((), Origin::Degraded { reason })),
            Err(local) => Err(GatewayError::Both { cloud: reason, local }),
        }
    }

    /// Metadata of every project visible to the caller.
    pub async fn list(&self) -> Result<Outcome<Vec<ProjectMeta>>, GatewayError> {
        let reason = match self.route() {
            Route::Local => {
                let metas = self.local.list().await?;
                return Ok(Outcome::new(metas, Origin::Local));
            }
            Route::Rejected(e) => e.to_string(),
            Route::Cloud { cloud, owner } => match cloud.list(&owner).await {
                Ok(metas) => return Ok(Outcome::new(metas, Origin::Cloud)),
                Err(e) => e.to_string(),
            },
        };

        log::warn!("Cloud listing failed, listing local projects: {}", reason);
        match self.local.list().await {
            Ok(metas) => Ok(Outcome::new(metas, Origin::Degraded { reason })),
            Err(local) => Err(GatewayError::Both { cloud: reason, local }),
        }
    }

    /// The most recently saved project on this device, if any.
    pub async fn load_last(&self) -> Result<Option<ProjectRecord>, GatewayError> {
        match self.local.load(LAST_PROJECT_KEY).await {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_local(&self, record: &ProjectRecord) -> StorageResult<u64> {
        let version = self.local.save(&record.meta.id, record).await?;
        if let Err(e) = self.local.save(LAST_PROJECT_KEY, record).await {
            log::warn!("Failed to record last project: {}", e);
        }
        Ok(version)
    }

    async fn upload_thumbnail(&self, owner: &str, project_id: &str, document: &Document) {
        let Some(sink) = &self.thumbnails else {
            return;
        };
        if let Err(e) = sink.upload(owner, project_id, document).await {
            log::warn!("Thumbnail upload for {} failed: {}", project_id, e);
        }
    }
}
