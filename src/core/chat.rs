//! Session chat log.
//!
//! Append-only, in arrival order. Local messages are recorded when sent,
//! remote ones when received; nothing is deduplicated.

use crate::core::protocol::FileId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChatEntry {
    Message(ChatMessage),
    /// An inbound file finished downloading.
    Download {
        file_id: FileId,
        name: String,
        size: u64,
    },
}

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: RwLock<Vec<ChatEntry>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_message(&self, message: ChatMessage) {
        self.entries.write().await.push(ChatEntry::Message(message));
    }

    pub async fn push_download(&self, file_id: FileId, name: String, size: u64) {
        self.entries
            .write()
            .await
            .push(ChatEntry::Download { file_id, name, size });
    }

    pub async fn entries(&self) -> Vec<ChatEntry> {
        self.entries.read().await.clone()
    }

    /// Chat messages only, download entries filtered out.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|e| match e {
                ChatEntry::Message(m) => Some(m.clone()),
                ChatEntry::Download { .. } => None,
            })
            .collect()
    }
}
