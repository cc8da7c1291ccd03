//! Wire encoding of [`WireMessage`].
//!
//! Field names match the browser client exactly, so a native peer and a
//! browser peer can share a session.

use super::FileId;
use crate::core::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serde helper: chunk payloads travel as standard base64 strings.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

const KNOWN_TAGS: &[&str] = &["message", "file-start", "chunk", "chunk-ack", "file-end"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "message")]
    Chat {
        data: String,
        username: String,
        date: DateTime<Utc>,
    },

    #[serde(rename = "file-start")]
    FileStart { id: FileId, name: String, size: u64 },

    #[serde(rename = "chunk")]
    Chunk {
        #[serde(rename = "idFile")]
        file_id: FileId,
        #[serde(with = "base64_bytes")]
        chunk: Vec<u8>,
        percentage: u32,
        #[serde(rename = "segmentNumber")]
        segment: u32,
    },

    #[serde(rename = "chunk-ack")]
    ChunkAck {
        #[serde(rename = "idFile")]
        file_id: FileId,
        #[serde(rename = "segmentNumber")]
        segment: u32,
    },

    #[serde(rename = "file-end")]
    FileEnd {
        #[serde(rename = "idFile")]
        file_id: FileId,
        filename: String,
    },
}

impl WireMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "message",
            Self::FileStart { .. } => "file-start",
            Self::Chunk { .. } => "chunk",
            Self::ChunkAck { .. } => "chunk-ack",
            Self::FileEnd { .. } => "file-end",
        }
    }
}

pub fn encode(msg: &WireMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Parse one inbound frame.
///
/// Unknown tags yield `Ok(None)` so newer peers can add message kinds.
/// Bad JSON, a missing tag, or a known tag with bad fields is an error.
pub fn decode(text: &str) -> Result<Option<WireMessage>, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?;
    if !KNOWN_TAGS.contains(&tag) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}
