//! Receiver half: registration, reassembly, acknowledgment, saving.

use super::TransferEngine;
use crate::core::error::TransferError;
use crate::core::events::{SessionEvent, notify_app};
use crate::core::protocol::{FileId, WireMessage};
use crate::utils::atomic_write::atomic_write;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

pub(super) struct InboundTransfer {
    seq: u64,
    name: String,
    size: u64,
    /// Payloads in receipt order.
    chunks: Vec<Vec<u8>>,
    segments: HashSet<u32>,
    progress: u32,
    completed: Option<Bytes>,
}

/// Read-only view of an inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSnapshot {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub progress: u32,
    /// Present once `file-end` was received.
    pub data: Option<Bytes>,
}

impl TransferEngine {
    pub async fn handle_file_start(&self, file_id: FileId, name: String, size: u64) {
        let seq = self.inbound_seq.fetch_add(1, Ordering::Relaxed);
        let replaced = self.inbound.write().await.insert(
            file_id.clone(),
            InboundTransfer {
                seq,
                name: name.clone(),
                size,
                chunks: Vec::new(),
                segments: HashSet::new(),
                progress: 0,
                completed: None,
            },
        );
        if replaced.is_some() {
            warn!(event = "file_restarted", file_id = %file_id, "Peer restarted a known transfer");
        }
        info!(event = "file_recv_start", file_id = %file_id, filename = %name, bytes = size);
        notify_app(&self.app_tx, SessionEvent::FileStarted { file_id, name, size });
    }

    /// Store one segment and acknowledge it. Retransmitted segments are
    /// acknowledged again but stored once.
    pub async fn handle_chunk(&self, file_id: FileId, payload: Vec<u8>, percentage: u32, segment: u32) {
        let name = {
            let mut map = self.inbound.write().await;
            match map.get_mut(&file_id) {
                Some(t) if t.completed.is_none() => {
                    if t.segments.insert(segment) {
                        t.chunks.push(payload);
                    } else {
                        debug!(event = "chunk_duplicate", file_id = %file_id, segment);
                    }
                    t.progress = percentage;
                    t.name.clone()
                }
                _ => {
                    debug!(event = "chunk_unknown_transfer", file_id = %file_id, segment);
                    return;
                }
            }
        };

        if let Err(e) = self
            .outbox
            .send(&WireMessage::ChunkAck {
                file_id: file_id.clone(),
                segment,
            })
            .await
        {
            warn!(event = "chunk_ack_send_failed", file_id = %file_id, segment, error = %e);
        }

        notify_app(
            &self.app_tx,
            SessionEvent::FileProgress {
                file_id,
                name,
                progress: percentage,
            },
        );
    }

    /// Complete a transfer. Returns the reassembled payload, or `None` when
    /// the id is unknown or already complete.
    pub async fn handle_file_end(&self, file_id: &FileId, filename: &str) -> Option<Bytes> {
        let (name, data) = {
            let mut map = self.inbound.write().await;
            let transfer = match map.get_mut(file_id) {
                Some(t) if t.completed.is_none() => t,
                _ => {
                    debug!(event = "file_end_unknown_transfer", file_id = %file_id);
                    return None;
                }
            };

            let total: usize = transfer.chunks.iter().map(Vec::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for chunk in transfer.chunks.drain(..) {
                buf.extend_from_slice(&chunk);
            }
            let data = buf.freeze();
            if data.len() as u64 != transfer.size {
                warn!(
                    event = "file_size_mismatch",
                    file_id = %file_id,
                    announced = transfer.size,
                    received = data.len(),
                );
            }
            transfer.progress = 100;
            transfer.completed = Some(data.clone());
            (transfer.name.clone(), data)
        };

        info!(
            event = "file_recv_complete",
            file_id = %file_id,
            filename = %filename,
            bytes = data.len(),
        );
        notify_app(
            &self.app_tx,
            SessionEvent::FileReceived {
                file_id: file_id.clone(),
                name,
                data: data.clone(),
            },
        );
        Some(data)
    }

    /// Drop an inbound transfer; later chunks for it are ignored.
    pub async fn cancel_inbound(&self, file_id: &FileId) -> bool {
        let removed = self.inbound.write().await.remove(file_id).is_some();
        if removed {
            info!(event = "file_recv_cancelled", file_id = %file_id);
        }
        removed
    }

    /// Inbound transfers in the order they started.
    pub async fn inbound_snapshots(&self) -> Vec<InboundSnapshot> {
        let map = self.inbound.read().await;
        let mut items: Vec<(u64, InboundSnapshot)> = map
            .iter()
            .map(|(id, t)| {
                (
                    t.seq,
                    InboundSnapshot {
                        id: id.clone(),
                        name: t.name.clone(),
                        size: t.size,
                        progress: t.progress,
                        data: t.completed.clone(),
                    },
                )
            })
            .collect();
        items.sort_by_key(|(seq, _)| *seq);
        items.into_iter().map(|(_, s)| s).collect()
    }

    /// Write a completed inbound file under `dir` and return its path.
    pub async fn save_received(&self, file_id: &FileId, dir: &Path) -> Result<PathBuf, TransferError> {
        let (name, data) = {
            let map = self.inbound.read().await;
            match map.get(file_id) {
                Some(InboundTransfer {
                    name,
                    completed: Some(data),
                    ..
                }) => (name.clone(), data.clone()),
                _ => return Err(TransferError::NotComplete(file_id.clone())),
            }
        };

        let path = dir.join(sanitize_relative_path(&name));
        atomic_write(&path, &data).await?;
        info!(event = "file_saved", file_id = %file_id, path = %path.display());
        Ok(path)
    }
}

/// Reduce a peer-supplied file name to a safe relative path.
fn sanitize_relative_path(name: &str) -> PathBuf {
    let normalized = name.replace('\\', "/");
    let mut result = PathBuf::new();
    for part in normalized.split('/').filter(|s| !s.is_empty()) {
        if part == "." || part == ".." {
            continue;
        }
        let safe: String = part
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
            .collect();
        if !safe.is_empty() && safe.chars().any(|c| c != '.') {
            result.push(safe);
        }
    }

    if result.as_os_str().is_empty() {
        PathBuf::from("file")
    } else {
        result
    }
}
