//! Element operations and their wire encoding.
//!
//! One operation is broadcast per mutation batch:
//! ```json
//! { "type": "element_update", "userId": "u1", "ts": 1700000000000,
//!   "elementId": "…", "changes": { "width": 40.0 }, "version": 1700000000000 }
//! ```

use crate::element::{Element, ElementId, ElementPatch};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire discriminators, in variant order.
pub const OPERATION_TYPES: [&str; 4] = [
    "element_add",
    "element_update",
    "element_delete",
    "element_reorder",
];

/// Errors from decoding an inbound operation.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing operation type")]
    MissingType,
    #[error("Unknown operation type: {0}")]
    UnknownType(String),
    #[error("Malformed {kind} payload: {message}")]
    Malformed { kind: String, message: String },
}

/// The mutation carried by an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OperationKind {
    #[serde(rename = "element_add")]
    Add { element: Element },
    #[serde(rename = "element_update")]
    Update {
        element_id: ElementId,
        changes: ElementPatch,
        version: u64,
    },
    #[serde(rename = "element_delete")]
    Delete { element_id: ElementId },
    #[serde(rename = "element_reorder")]
    Reorder {
        #[serde(alias = "newOrder")]
        element_ids: Vec<ElementId>,
    },
}

impl OperationKind {
    /// Wire discriminator for this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationKind::Add { .. } => OPERATION_TYPES[0],
            OperationKind::Update { .. } => OPERATION_TYPES[1],
            OperationKind::Delete { .. } => OPERATION_TYPES[2],
            OperationKind::Reorder { .. } => OPERATION_TYPES[3],
        }
    }

    /// Element the operation targets, if it targets exactly one.
    pub fn element_id(&self) -> Option<ElementId> {
        match self {
            OperationKind::Add { element } => Some(element.id),
            OperationKind::Update { element_id, .. } | OperationKind::Delete { element_id } => {
                Some(*element_id)
            }
            OperationKind::Reorder { .. } => None,
        }
    }
}

/// A single mutation broadcast to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Originating user.
    pub user_id: String,
    /// Origination time, unix milliseconds.
    pub ts: u64,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(user_id: impl Into<String>, ts: u64, kind: OperationKind) -> Self {
        Self {
            user_id: user_id.into(),
            ts,
            kind,
        }
    }
}

/// Encode an operation as JSON text.
pub fn encode(op: &Operation) -> Result<String, serde_json::Error> {
    serde_json::to_string(op)
}

/// Decode an operation from JSON text.
pub fn decode(text: &str) -> Result<Operation, CodecError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    decode_value(value)
}

/// Decode an operation from an already-parsed JSON value.
///
/// The `type` discriminator is checked before the payload so an unknown kind
/// is reported as such rather than as a generic shape mismatch.
pub fn decode_value(value: serde_json::Value) -> Result<Operation, CodecError> {
    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        _ => return Err(CodecError::MissingType),
    };
    if !OPERATION_TYPES.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| CodecError::Malformed {
        kind,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use uuid::Uuid;

    #[test]
    fn test_update_wire_shape() {
        let id = Uuid::new_v4();
        let op = Operation::new(
            "user-1",
            42,
            OperationKind::Update {
                element_id: id,
                changes: ElementPatch::moved_to(Point::new(1.0, 2.0)),
                version: 7,
            },
        );
        let json: serde_json::Value = serde_json::from_str(&encode(&op).unwrap()).unwrap();
        assert_eq!(json["type"], "element_update");
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["ts"], 42);
        assert_eq!(json["elementId"], id.to_string());
        assert_eq!(json["version"], 7);
        assert!(json["changes"]["position"].is_object() || json["changes"]["position"].is_array());
    }

    #[test]
    fn test_add_roundtrip() {
        let el = crate::element::Element::rectangle(Point::new(3.0, 4.0), 5.0, 6.0);
        let op = Operation::new("u", 1, OperationKind::Add { element: el.clone() });
        let decoded = decode(&encode(&op).unwrap()).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.kind.element_id(), Some(el.id));
    }

    #[test]
    fn test_reorder_accepts_new_order_alias() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"element_reorder","userId":"u","ts":1,"newOrder":["{b}","{a}"]}}"#
        );
        let op = decode(&text).unwrap();
        assert_eq!(op.kind, OperationKind::Reorder { element_ids: vec![b, a] });
    }

    #[test]
    fn test_decode_missing_type() {
        let err = decode(r#"{"userId":"u","ts":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingType));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(r#"{"type":"element_explode","userId":"u","ts":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(ref t) if t == "element_explode"));
    }

    #[test]
    fn test_decode_missing_required_field() {
        let err = decode(r#"{"type":"element_delete","userId":"u","ts":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { ref kind, .. } if kind == "element_delete"));
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(decode("{not json"), Err(CodecError::Json(_))));
    }
}
