//! Debounced snapshot saves and version-gap detection.
//!
//! Broadcast operations keep peers close; snapshots make the state durable
//! and give late joiners a baseline. Every cloud save bumps the shared
//! project version and the relay tells the other peers about it. A peer that
//! sees a version it could not have reached through broadcasts alone reloads
//! in full. Local-store versions are private to the device and never feed
//! the shared version.

use crate::canvas::Canvas;
use crate::gateway::{GatewayError, Origin, Outcome, PersistenceGateway};
use crate::storage::{ProjectRecord, Viewport};
use std::time::{Duration, Instant};

/// Result of comparing a remote version notice with the local version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    InSync,
    /// Updates were missed; a full load is required.
    Reconcile { local: u64, remote: u64 },
}

#[derive(Debug)]
pub struct SnapshotSynchronizer {
    project_id: String,
    debounce: Duration,
    reconcile_gap: u64,
    deadline: Option<Instant>,
    /// Last shared (cloud) version this client has caught up with.
    local_version: u64,
}

impl SnapshotSynchronizer {
    pub fn new(project_id: impl Into<String>, debounce: Duration, reconcile_gap: u64) -> Self {
        Self {
            project_id: project_id.into(),
            debounce,
            reconcile_gap: reconcile_gap.max(1),
            deadline: None,
            local_version: 0,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn local_version(&self) -> u64 {
        self.local_version
    }

    /// Adopt a version learned out of band (e.g. on joining the channel).
    pub fn set_local_version(&mut self, version: u64) {
        self.local_version = version;
    }

    /// Note an edit. Restarts the debounce window.
    pub fn schedule_save(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    pub fn has_pending_save(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|at| now >= at)
    }

    /// Save if the debounce window has elapsed. Returns None when nothing
    /// was due. A failed save re-arms the window so the edit is retried.
    pub async fn save_if_due(
        &mut self,
        now: Instant,
        gateway: &PersistenceGateway,
        canvas: &Canvas,
        viewport: Viewport,
    ) -> Option<Result<Outcome<u64>, GatewayError>> {
        if !self.is_due(now) {
            return None;
        }
        self.deadline = None;
        let result = gateway.save(&self.project_id, &canvas.document, viewport).await;
        match &result {
            Ok(outcome) if outcome.is_shared() => {
                self.local_version = outcome.value;
                log::debug!("Saved {} at version {}", self.project_id, outcome.value);
            }
            Ok(outcome) => {
                log::debug!(
                    "Saved {} to the local store only (local version {})",
                    self.project_id,
                    outcome.value
                );
            }
            Err(e) => {
                log::error!("Snapshot save of {} failed: {}", self.project_id, e);
                self.deadline = Some(now + self.debounce);
            }
        }
        Some(result)
    }

    /// Compare a version announced by the relay with ours.
    pub fn on_remote_version_notice(&mut self, remote: u64) -> VersionCheck {
        if remote >= self.local_version.saturating_add(self.reconcile_gap) {
            log::info!(
                "Version gap on {}: local {}, remote {}",
                self.project_id,
                self.local_version,
                remote
            );
            return VersionCheck::Reconcile {
                local: self.local_version,
                remote,
            };
        }
        if remote > self.local_version {
            self.local_version = remote;
        }
        VersionCheck::InSync
    }

    /// Full reload after a version gap, targeting shared version `remote`.
    ///
    /// Only a cloud load can supply that version. When the gateway answers
    /// from the local store, the canvas keeps the operations it already
    /// applied and the remote version is adopted so the same gap does not
    /// trigger again.
    pub async fn reconcile(
        &mut self,
        gateway: &PersistenceGateway,
        canvas: &mut Canvas,
        remote: u64,
    ) -> Result<Origin, GatewayError> {
        let outcome = gateway.load(&self.project_id).await?;
        if !outcome.is_shared() {
            log::warn!(
                "No shared snapshot of {} reachable, keeping live state at version {}",
                self.project_id,
                remote
            );
            self.local_version = self.local_version.max(remote);
            return Ok(outcome.origin);
        }
        self.adopt(outcome.value.version(), outcome.value, canvas);
        Ok(outcome.origin)
    }

    /// Initial load when a project is opened. Any store will do; only a
    /// cloud record sets the shared version.
    pub async fn load(
        &mut self,
        gateway: &PersistenceGateway,
        canvas: &mut Canvas,
    ) -> Result<Origin, GatewayError> {
        let outcome = gateway.load(&self.project_id).await?;
        let version = if outcome.is_shared() {
            outcome.value.version()
        } else {
            self.local_version
        };
        self.adopt(version, outcome.value, canvas);
        Ok(outcome.origin)
    }

    fn adopt(&mut self, version: u64, record: ProjectRecord, canvas: &mut Canvas) {
        self.local_version = version;
        canvas.replace_document(record.to_document());
        log::info!(
            "Reloaded {} at version {} ({} elements)",
            self.project_id,
            self.local_version,
            canvas.document.len()
        );
    }
}
