//! InkSync Core Library
//!
//! Real-time synchronization for a collaborative canvas: operation codec,
//! last-writer-wins applier, presence, debounced snapshots, reconnection and
//! persistence with local fallback.

pub mod applier;
pub mod canvas;
pub mod config;
pub mod credential;
pub mod element;
pub mod gateway;
pub mod ops;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod sync_session;
pub mod transport;
pub mod version;

pub use applier::{AppliedResult, IgnoreReason, apply};
pub use canvas::{Canvas, Document, RenderScheduler};
pub use config::{ReconnectPolicy, SyncConfig};
pub use credential::{Claims, CredentialError};
pub use element::{Element, ElementId, ElementKind, ElementPatch};
pub use gateway::{GatewayError, Origin, Outcome, PersistenceGateway, ThumbnailSink};
pub use ops::{CodecError, Operation, OperationKind};
pub use presence::{Identity, PresenceRecord, PresenceTracker};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{ConnectionManager, ConnectionStatus, SessionAction};
pub use snapshot::{SnapshotSynchronizer, VersionCheck};
pub use storage::{CloudStorage, FileStorage, MemoryCloudStorage, MemoryStorage, Storage, StorageError};
pub use sync_session::{SessionEvent, SyncSession, SyncStatus};
pub use transport::{NativeWebSocket, Transport, TransportError, TransportEvent};
