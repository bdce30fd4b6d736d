//! Wire messages for the channel-backed registry protocol.
//!
//! Every message is a JSON object tagged by `type` and carrying an integer
//! `id`. Requests are answered by the response of the same kind and id:
//!
//! ```json
//! {"type": "request.get", "id": 1, "key": "a.b"}
//! {"type": "response.get", "id": 1, "key": "a.b", "value": 5, "success": true}
//! ```
//!
//! Optional fields are omitted when absent. A present `"value": null` is kept
//! distinct from a missing `value`.

use openv_registry::Value;
use serde::{Deserialize, Deserializer, Serialize};

/// A registry protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "request.get")]
    GetRequest { id: u64, key: String },

    #[serde(rename = "request.set")]
    SetRequest {
        id: u64,
        key: String,
        #[serde(default)]
        value: Value,
    },

    #[serde(rename = "request.delete")]
    DeleteRequest { id: u64, key: String },

    #[serde(rename = "request.list")]
    ListRequest { id: u64 },

    #[serde(rename = "response.get")]
    GetResponse {
        id: u64,
        key: String,
        #[serde(
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
        success: bool,
    },

    #[serde(rename = "response.set")]
    SetResponse {
        id: u64,
        key: String,
        #[serde(default)]
        value: Value,
        success: bool,
    },

    #[serde(rename = "response.delete")]
    DeleteResponse { id: u64, key: String, success: bool },

    #[serde(rename = "response.list")]
    ListResponse {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entries: Option<Vec<(String, Value)>>,
        success: bool,
    },
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// The correlation id.
    pub fn id(&self) -> u64 {
        match self {
            Message::GetRequest { id, .. }
            | Message::SetRequest { id, .. }
            | Message::DeleteRequest { id, .. }
            | Message::ListRequest { id }
            | Message::GetResponse { id, .. }
            | Message::SetResponse { id, .. }
            | Message::DeleteResponse { id, .. }
            | Message::ListResponse { id, .. } => *id,
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::GetRequest { .. } => "request.get",
            Message::SetRequest { .. } => "request.set",
            Message::DeleteRequest { .. } => "request.delete",
            Message::ListRequest { .. } => "request.list",
            Message::GetResponse { .. } => "response.get",
            Message::SetResponse { .. } => "response.set",
            Message::DeleteResponse { .. } => "response.delete",
            Message::ListResponse { .. } => "response.list",
        }
    }

    /// The key this message concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Message::GetRequest { key, .. }
            | Message::SetRequest { key, .. }
            | Message::DeleteRequest { key, .. }
            | Message::GetResponse { key, .. }
            | Message::SetResponse { key, .. }
            | Message::DeleteResponse { key, .. } => Some(key),
            Message::ListRequest { .. } | Message::ListResponse { .. } => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::GetRequest { .. }
                | Message::SetRequest { .. }
                | Message::DeleteRequest { .. }
                | Message::ListRequest { .. }
        )
    }

    /// Encode as a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON string.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
