//! Channel envelopes exchanged with the relay server.
//!
//! One channel per project, keyed by [`topic_for`]. Messages are JSON text
//! frames tagged by `type`:
//! ```json
//! { "type": "join", "topic": "project:abc", "presence": { … } }
//! { "type": "operation", "op": { "type": "element_add", … } }
//! { "type": "version_notice", "version": 12 }
//! ```

use crate::ops::{self, CodecError, Operation};
use crate::presence::PresenceRecord;
use serde::{Deserialize, Serialize};

/// Channel topic for a project.
pub fn topic_for(project_id: &str) -> String {
    format!("project:{project_id}")
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a project channel and track presence in it.
    Join {
        topic: String,
        presence: PresenceRecord,
    },
    /// Leave the current channel.
    Leave,
    /// Broadcast an element operation.
    Operation { op: Operation },
    /// Presence refresh (cursor, tool).
    Presence { presence: PresenceRecord },
    /// A full snapshot was persisted at this project version.
    Saved { version: u64 },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription confirmed, with the channel's presence state.
    Joined {
        topic: String,
        peers: Vec<PresenceRecord>,
        /// Last project version announced in the channel.
        #[serde(default)]
        version: u64,
    },
    PeerJoined { presence: PresenceRecord },
    PeerLeft {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Operation from another peer.
    Operation { from: String, op: Operation },
    Presence { presence: PresenceRecord },
    /// Out-of-band notice of the server's current project version.
    VersionNotice { version: u64 },
    Error { message: String },
}

const SERVER_TYPES: [&str; 7] = [
    "joined",
    "peer_joined",
    "peer_left",
    "operation",
    "presence",
    "version_notice",
    "error",
];

const CLIENT_TYPES: [&str; 5] = ["join", "leave", "operation", "presence", "saved"];

/// Encode any envelope as JSON text.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Decode a server frame, running embedded operations through the
/// operation codec.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    let kind = envelope_type(&value, &SERVER_TYPES)?;
    if kind == "operation" {
        let op = decode_embedded_op(&mut value)?;
        let from = value
            .get("from")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::Malformed {
                kind: kind.clone(),
                message: "missing field `from`".to_string(),
            })?
            .to_string();
        return Ok(ServerMessage::Operation { from, op });
    }
    serde_json::from_value(value).map_err(|e| CodecError::Malformed {
        kind,
        message: e.to_string(),
    })
}

/// Decode a client frame (server side).
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    let kind = envelope_type(&value, &CLIENT_TYPES)?;
    if kind == "operation" {
        let op = decode_embedded_op(&mut value)?;
        return Ok(ClientMessage::Operation { op });
    }
    serde_json::from_value(value).map_err(|e| CodecError::Malformed {
        kind,
        message: e.to_string(),
    })
}

fn envelope_type(value: &serde_json::Value, known: &[&str]) -> Result<String, CodecError> {
    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        _ => return Err(CodecError::MissingType),
    };
    if !known.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType(kind));
    }
    Ok(kind)
}

fn decode_embedded_op(value: &mut serde_json::Value) -> Result<Operation, CodecError> {
    let op = value
        .get_mut("op")
        .map(serde_json::Value::take)
        .ok_or_else(|| CodecError::Malformed {
            kind: "operation".to_string(),
            message: "missing field `op`".to_string(),
        })?;
    ops::decode_value(op)
}
