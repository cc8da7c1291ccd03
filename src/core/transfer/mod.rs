//! Chunked file transfer over the shared data channel.
//!
//! Protocol per file: `file-start`, then for each segment a `chunk` answered
//! by a `chunk-ack` (stop-and-wait, one segment in flight), then `file-end`.
//! The engine is the only owner of transfer state: the sender half keeps one
//! awaiting-ack slot per outbound transfer, the receiver half reassembles
//! inbound transfers in receipt order.

mod receiver;
mod sender;

pub use receiver::InboundSnapshot;

use crate::core::config::{CHUNK_ACK_TIMEOUT, CHUNK_SIZE, MAX_CHUNK_RETRANSMITS};
use crate::core::events::AppTx;
use crate::core::link::Outbox;
use crate::core::protocol::FileId;
use bytes::Bytes;
use receiver::InboundTransfer;
use sender::OutboundTransfer;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub ack_timeout: Duration,
    pub max_retransmits: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            ack_timeout: CHUNK_ACK_TIMEOUT,
            max_retransmits: MAX_CHUNK_RETRANSMITS,
        }
    }
}

/// A file to send, fully loaded in memory.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub id: FileId,
    pub name: String,
    pub data: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: FileId::random(),
            name: name.into(),
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(name, data))
    }
}

/// Number of chunk windows for `size` bytes. Zero-byte files have none.
pub fn chunk_count(size: usize, chunk_size: usize) -> u32 {
    size.div_ceil(chunk_size.max(1)) as u32
}

/// Progress reported with segment `index`: `floor(100 * index / total)`.
/// The last chunk therefore never reports 100.
pub fn chunk_percentage(index: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100 * index as u64 / total as u64) as u32
}

pub struct TransferEngine {
    outbox: Arc<Outbox>,
    config: TransferConfig,
    outbound: Arc<RwLock<HashMap<FileId, OutboundTransfer>>>,
    inbound: Arc<RwLock<HashMap<FileId, InboundTransfer>>>,
    inbound_seq: AtomicU64,
    app_tx: AppTx,
}

impl TransferEngine {
    pub fn new(outbox: Arc<Outbox>, config: TransferConfig, app_tx: AppTx) -> Self {
        Self {
            outbox,
            config,
            outbound: Arc::new(RwLock::new(HashMap::new())),
            inbound: Arc::new(RwLock::new(HashMap::new())),
            inbound_seq: AtomicU64::new(0),
            app_tx,
        }
    }

    /// Cancel every transfer in both directions.
    pub async fn cancel_all(&self) {
        for (_, transfer) in self.outbound.write().await.drain() {
            transfer.stop.cancel();
        }
        self.inbound.write().await.clear();
    }
}
