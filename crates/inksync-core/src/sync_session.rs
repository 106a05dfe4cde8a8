//! The sync session: one editing client joined to one project.
//!
//! A [`SyncSession`] owns every piece of per-project sync state. The host
//! feeds it [`SessionEvent`]s through [`SyncSession::handle`] and calls
//! [`SyncSession::tick`] from its frame or timer loop; timers are deadlines
//! checked there, never background tasks.

use crate::applier::{self, AppliedResult};
use crate::canvas::Canvas;
use crate::config::SyncConfig;
use crate::gateway::{GatewayError, Origin, PersistenceGateway};
use crate::ops::{Operation, OperationKind};
use crate::presence::{Identity, PresenceTracker};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::session::{ConnectionManager, ConnectionStatus, SessionAction};
use crate::snapshot::{SnapshotSynchronizer, VersionCheck};
use crate::storage::{StorageError, Viewport};
use crate::transport::{Transport, TransportEvent};
use crate::version::now_millis;
use kurbo::Point;
use std::time::Instant;

/// Inputs to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transport(TransportEvent),
    /// The OS reported connectivity.
    Online,
    /// The OS reported loss of connectivity.
    Offline,
}

/// Save indicator shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    /// Edits are waiting for the debounced save.
    Saving,
    Saved { version: u64 },
    /// The last save or load missed the cloud and used the local store.
    Degraded { reason: String },
    Offline,
}

pub struct SyncSession<T: Transport> {
    config: SyncConfig,
    identity: Identity,
    project_id: String,
    topic: String,
    transport: T,
    connection: ConnectionManager,
    presence: PresenceTracker,
    snapshot: SnapshotSynchronizer,
    status: SyncStatus,
    viewport: Viewport,
    joined: bool,
    /// Shared version to reload towards on the next tick.
    reconcile_pending: Option<u64>,
    /// Local operations committed while not joined, sent on the next join.
    outbox: Vec<Operation>,
    /// Cloud save made while not joined, announced on the next join.
    unannounced_save: Option<u64>,
}

impl<T: Transport> SyncSession<T> {
    pub fn new(config: SyncConfig, identity: Identity, project_id: impl Into<String>, transport: T) -> Self {
        let project_id = project_id.into();
        Self {
            topic: protocol::topic_for(&project_id),
            connection: ConnectionManager::new(config.reconnect),
            presence: PresenceTracker::new(&identity, config.presence_throttle),
            snapshot: SnapshotSynchronizer::new(
                project_id.clone(),
                config.save_debounce,
                config.reconcile_gap,
            ),
            config,
            identity,
            project_id,
            transport,
            status: SyncStatus::Idle,
            viewport: Viewport::default(),
            joined: false,
            reconcile_pending: None,
            outbox: Vec::new(),
            unannounced_save: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn snapshot(&self) -> &SnapshotSynchronizer {
        &self.snapshot
    }

    /// True once the channel subscription is confirmed.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Operations waiting for the channel.
    pub fn queued_operations(&self) -> usize {
        self.outbox.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Camera state stored with the next snapshot.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Load the project's last snapshot into `canvas`. A project that was
    /// never saved opens empty.
    pub async fn open(&mut self, gateway: &PersistenceGateway, canvas: &mut Canvas) -> Result<(), GatewayError> {
        match self.snapshot.load(gateway, canvas).await {
            Ok(Origin::Degraded { reason }) => {
                self.set_status(SyncStatus::Degraded { reason });
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(GatewayError::Local(StorageError::NotFound(_))) => {
                log::info!("Project {} has no snapshot yet", self.project_id);
                Ok(())
            }
            Err(GatewayError::Both { cloud, local: StorageError::NotFound(_) }) => {
                log::info!("Project {} has no snapshot yet (cloud: {})", self.project_id, cloud);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start (or restart) the connection. Resets the backoff schedule.
    pub fn connect(&mut self, now: Instant) {
        if let Some(SessionAction::Connect) = self.connection.connect() {
            self.open_transport(now);
        }
    }

    /// Leave the channel and stop reconnecting.
    pub fn disconnect(&mut self, canvas: &mut Canvas) {
        if self.joined {
            self.send(&ClientMessage::Leave);
        }
        self.joined = false;
        self.connection.disconnect();
        self.transport.disconnect();
        self.presence.clear_peers(&mut canvas.render);
    }

    /// Publish an edit already applied to the local canvas. Never fails:
    /// while the channel is not joined the operation is queued and sent, in
    /// commit order, once the next join is confirmed.
    pub fn commit_local(&mut self, kind: OperationKind, now: Instant) {
        let op = Operation::new(self.identity.user_id.clone(), now_millis(), kind);
        self.snapshot.schedule_save(now);
        if self.status != SyncStatus::Offline {
            self.status = SyncStatus::Saving;
        }
        if !self.joined {
            log::debug!("Not joined, queueing {}", op.kind.type_name());
            self.outbox.push(op);
            return;
        }
        self.send(&ClientMessage::Operation { op });
    }

    /// Local cursor movement. Throttled.
    pub fn move_cursor(&mut self, cursor: Point, tool: &str, now: Instant) {
        let Some(presence) = self.presence.track(cursor, tool, now) else {
            return;
        };
        if self.joined {
            self.send(&ClientMessage::Presence { presence });
        }
    }

    /// Single dispatch point for every session input.
    pub fn handle(&mut self, event: SessionEvent, canvas: &mut Canvas, now: Instant) {
        match event {
            SessionEvent::Transport(TransportEvent::Connected) => {
                self.connection.on_connected();
                let presence = self.presence.announce(now);
                self.send(&ClientMessage::Join {
                    topic: self.topic.clone(),
                    presence,
                });
            }
            SessionEvent::Transport(TransportEvent::Text(text)) => match protocol::decode_server(&text) {
                Ok(msg) => self.on_server_message(msg, canvas),
                Err(e) => log::warn!("Dropping malformed frame: {}", e),
            },
            SessionEvent::Transport(TransportEvent::Disconnected) => {
                self.on_transport_lost(now, "connection closed", canvas);
            }
            SessionEvent::Transport(TransportEvent::Error { message }) => {
                self.on_transport_lost(now, &message, canvas);
            }
            SessionEvent::Online => {
                if self.status == SyncStatus::Offline {
                    self.status = SyncStatus::Idle;
                }
                if let Some(SessionAction::Connect) = self.connection.on_online() {
                    self.open_transport(now);
                }
            }
            SessionEvent::Offline => {
                self.connection.on_offline();
                self.joined = false;
                self.transport.disconnect();
                self.presence.clear_peers(&mut canvas.render);
                self.status = SyncStatus::Offline;
            }
        }
    }

    /// Drain pending transport events through [`Self::handle`].
    pub fn pump(&mut self, canvas: &mut Canvas, now: Instant) {
        for event in self.transport.poll_events() {
            self.handle(SessionEvent::Transport(event), canvas, now);
        }
    }

    /// Periodic work: transport events, the reconnect timer, pending
    /// reconciliation and the debounced save.
    pub async fn tick(&mut self, now: Instant, canvas: &mut Canvas, gateway: &PersistenceGateway) {
        self.pump(canvas, now);

        if let Some(SessionAction::Connect) = self.connection.poll(now) {
            self.open_transport(now);
        }

        if let Some(remote) = self.reconcile_pending.take() {
            match self.snapshot.reconcile(gateway, canvas, remote).await {
                Ok(Origin::Cloud) => {
                    // Queued edits are newer than the reloaded snapshot.
                    for op in &self.outbox {
                        applier::replay(op, canvas);
                    }
                    self.note_origin(Origin::Cloud, self.snapshot.local_version());
                }
                Ok(Origin::Degraded { reason }) => self.set_status(SyncStatus::Degraded { reason }),
                Ok(Origin::Local) => {}
                Err(e) => {
                    log::error!("Reload of {} failed: {}", self.project_id, e);
                    self.set_status(SyncStatus::Degraded { reason: e.to_string() });
                }
            }
            if self.joined {
                self.flush_outbox();
            }
        }

        match self.snapshot.save_if_due(now, gateway, canvas, self.viewport).await {
            None => {}
            Some(Ok(outcome)) => {
                let version = outcome.value;
                // Only cloud versions are shared; a local-store counter would
                // look like a gap to peers.
                if outcome.is_shared() {
                    if self.joined {
                        self.send(&ClientMessage::Saved { version });
                    } else {
                        self.unannounced_save = Some(version);
                    }
                }
                self.note_origin(outcome.origin, version);
            }
            Some(Err(e)) => {
                self.set_status(SyncStatus::Degraded { reason: e.to_string() });
            }
        }
    }

    fn on_server_message(&mut self, msg: ServerMessage, canvas: &mut Canvas) {
        match msg {
            ServerMessage::Joined { topic, peers, version } => {
                if topic != self.topic {
                    log::warn!("Joined unexpected topic {}", topic);
                    return;
                }
                log::info!("Joined {} with {} peers", topic, peers.len());
                self.joined = true;
                self.presence.on_sync(peers, &mut canvas.render);
                self.on_version_notice(version);
                // With a reload pending, queued edits wait for it in `tick`.
                if self.reconcile_pending.is_none() {
                    self.flush_outbox();
                }
            }
            ServerMessage::PeerJoined { presence } => self.presence.on_join(presence, &mut canvas.render),
            ServerMessage::PeerLeft { user_id } => {
                self.presence.on_leave(&user_id, &mut canvas.render);
            }
            ServerMessage::Operation { from, op } => {
                if from != op.user_id {
                    log::debug!("Operation relayed for {} stamped by {}", from, op.user_id);
                }
                if let AppliedResult::Ignored(reason) = applier::apply(&op, &self.identity.user_id, canvas) {
                    log::trace!("Ignored {} from {}: {:?}", op.kind.type_name(), op.user_id, reason);
                }
            }
            ServerMessage::Presence { presence } => self.presence.on_update(presence, &mut canvas.render),
            ServerMessage::VersionNotice { version } => self.on_version_notice(version),
            ServerMessage::Error { message } => log::warn!("Relay error: {}", message),
        }
    }

    fn on_version_notice(&mut self, version: u64) {
        if let VersionCheck::Reconcile { remote, .. } = self.snapshot.on_remote_version_notice(version) {
            self.reconcile_pending = Some(self.reconcile_pending.map_or(remote, |r| r.max(remote)));
        }
    }

    fn flush_outbox(&mut self) {
        if !self.outbox.is_empty() {
            log::info!("Sending {} queued operations", self.outbox.len());
        }
        for op in std::mem::take(&mut self.outbox) {
            self.send(&ClientMessage::Operation { op });
        }
        if let Some(version) = self.unannounced_save.take() {
            if version >= self.snapshot.local_version() {
                self.send(&ClientMessage::Saved { version });
            }
        }
    }

    fn on_transport_lost(&mut self, now: Instant, reason: &str, canvas: &mut Canvas) {
        self.joined = false;
        self.transport.disconnect();
        self.presence.clear_peers(&mut canvas.render);
        self.connection.on_error(now, reason);
    }

    fn open_transport(&mut self, now: Instant) {
        let url = self.config.server_url.clone();
        if let Err(e) = self.transport.connect(&url) {
            log::warn!("Could not open transport to {}: {}", url, e);
            self.connection.on_error(now, &e.to_string());
        }
    }

    fn send(&self, msg: &ClientMessage) {
        let text = match protocol::encode(msg) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode message: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send(&text) {
            log::warn!("Send failed: {}", e);
        }
    }

    fn note_origin(&mut self, origin: Origin, version: u64) {
        match origin {
            Origin::Degraded { reason } => self.set_status(SyncStatus::Degraded { reason }),
            Origin::Cloud | Origin::Local => {
                if self.snapshot.has_pending_save() {
                    self.set_status(SyncStatus::Saving);
                } else {
                    self.set_status(SyncStatus::Saved { version });
                }
            }
        }
    }

    /// Offline wins over every save outcome until connectivity returns.
    fn set_status(&mut self, status: SyncStatus) {
        if self.status != SyncStatus::Offline {
            self.status = status;
        }
    }
}
