//! JSON wire protocol for the room and document channels.
//!
//! Every frame is a WebSocket text message holding one JSON object.
//!
//! Room channel (chat-style, relayed verbatim):
//! ```text
//! { "type": "...", "content": <any>, "room": "...", "user": "...", "time": "RFC 3339" }
//! ```
//!
//! Document channel:
//! ```text
//! { "type": "edit" | "request_document" | "document_update"          (inbound)
//!         | "document_state" | "document_updated" | "error",          (outbound)
//!   "document": "...", "edit"?: {...}, "content"?: "...", "version"?: n,
//!   "user": "...", "time": "RFC 3339" }
//! ```
//!
//! `room`, `document` and `time` are stamped by the server on every inbound
//! frame; whatever the client put there is discarded.

use chrono::{DateTime, Utc};
use coscribe_core::Edit;
use serde::{Deserialize, Serialize};

/// A chat-style message on a room channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Free-form payload, relayed untouched.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl RoomMessage {
    pub fn new(msg_type: impl Into<String>, content: serde_json::Value, user: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            content,
            room: String::new(),
            user: user.into(),
            time: Utc::now(),
        }
    }

    /// Overwrite the server-authoritative fields.
    pub fn stamp(&mut self, room: &str) {
        self.room = room.to_string();
        self.time = Utc::now();
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Message kinds on the document channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentMessageType {
    /// Client submits one positional edit
    Edit,
    /// Client asks for the current content and version
    RequestDocument,
    /// Client overwrites the whole document
    DocumentUpdate,
    /// Server sends content and version privately
    DocumentState,
    /// Server confirms a whole-document overwrite
    DocumentUpdated,
    /// Server reports a rejected request privately
    Error,
    /// Any type this server does not know
    #[serde(other)]
    Unknown,
}

/// A message on a document channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMessage {
    #[serde(rename = "type")]
    pub msg_type: DocumentMessageType,
    #[serde(default)]
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<Edit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub user: String,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl DocumentMessage {
    fn new(msg_type: DocumentMessageType, document: impl Into<String>) -> Self {
        Self {
            msg_type,
            document: document.into(),
            edit: None,
            content: None,
            version: None,
            user: String::new(),
            time: Utc::now(),
        }
    }

    /// Client → server: submit an edit.
    pub fn edit(edit: Edit, user: impl Into<String>) -> Self {
        Self {
            edit: Some(edit),
            user: user.into(),
            ..Self::new(DocumentMessageType::Edit, "")
        }
    }

    /// Client → server: ask for the current state.
    pub fn request_document(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::new(DocumentMessageType::RequestDocument, "")
        }
    }

    /// Client → server: overwrite the whole document.
    pub fn document_update(content: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            user: user.into(),
            ..Self::new(DocumentMessageType::DocumentUpdate, "")
        }
    }

    /// Server → client: current content and version.
    pub fn document_state(document: &str, content: String, version: u64) -> Self {
        Self {
            content: Some(content),
            version: Some(version),
            ..Self::new(DocumentMessageType::DocumentState, document)
        }
    }

    /// Server → client: a `document_update` was applied.
    pub fn document_updated(document: &str, content: String, version: u64) -> Self {
        Self {
            content: Some(content),
            version: Some(version),
            ..Self::new(DocumentMessageType::DocumentUpdated, document)
        }
    }

    /// Server → client: the request was refused.
    pub fn error(document: &str, reason: impl Into<String>) -> Self {
        Self {
            content: Some(reason.into()),
            ..Self::new(DocumentMessageType::Error, document)
        }
    }

    /// Overwrite the server-authoritative fields.
    pub fn stamp(&mut self, document: &str) {
        self.document = document.to_string();
        self.time = Utc::now();
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use coscribe_core::EditKind;
    use serde_json::json;

    #[test]
    fn test_room_message_stamp_overrides_client_fields() {
        let raw = r#"{"type":"chat","content":{"text":"hi"},"room":"spoofed","user":"alice","time":"2000-01-01T00:00:00Z"}"#;
        let mut msg = RoomMessage::decode(raw).unwrap();
        let before = Utc::now();
        msg.stamp("lobby");

        assert_eq!(msg.room, "lobby");
        assert!(msg.time >= before);
        assert_eq!(msg.content, json!({"text": "hi"}));
        assert_eq!(msg.user, "alice");
    }

    #[test]
    fn test_room_message_minimal_frame() {
        let msg = RoomMessage::decode(r#"{"type":"chat"}"#).unwrap();
        assert_eq!(msg.msg_type, "chat");
        assert!(msg.content.is_null());
    }

    #[test]
    fn test_document_message_edit_frame() {
        let raw = r#"{
            "type": "edit",
            "document": "ignored",
            "edit": {"type": "delete", "line_no": 0, "column": 3, "length": 10, "version": 2},
            "user": "bob"
        }"#;
        let msg = DocumentMessage::decode(raw).unwrap();
        assert_eq!(msg.msg_type, DocumentMessageType::Edit);
        let edit = msg.edit.unwrap();
        assert_eq!(edit.kind, EditKind::Delete);
        assert_eq!(edit.length, 10);
        assert_eq!(edit.version, 2);
    }

    #[test]
    fn test_unknown_document_type_is_not_malformed() {
        let msg = DocumentMessage::decode(r#"{"type":"cursor","document":"d"}"#).unwrap();
        assert_eq!(msg.msg_type, DocumentMessageType::Unknown);
    }

    #[test]
    fn test_document_state_shape() {
        let msg = DocumentMessage::document_state("doc-1", "a\nb".into(), 4);
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "document_state");
        assert_eq!(value["document"], "doc-1");
        assert_eq!(value["content"], "a\nb");
        assert_eq!(value["version"], 4);
        assert!(value.get("edit").is_none());
    }

    #[test]
    fn test_error_message_shape() {
        let msg = DocumentMessage::error("doc-1", "version conflict: expected 4, got 3");
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["content"], "version conflict: expected 4, got 3");
        assert!(value.get("version").is_none());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(DocumentMessage::decode("not json").is_err());
        assert!(RoomMessage::decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_update_without_content() {
        let msg = DocumentMessage::decode(r#"{"type":"document_update","document":"d"}"#).unwrap();
        assert_eq!(msg.msg_type, DocumentMessageType::DocumentUpdate);
        assert!(msg.content.is_none());
    }
}
