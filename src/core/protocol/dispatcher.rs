//! Routes inbound data-channel frames to a [`MessageHandler`] by tag.

use super::{FileId, WireMessage, decode};
use crate::core::transport::DataChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// One method per message tag. Calls arrive in channel order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_chat(&self, text: String, sender: String, date: DateTime<Utc>);

    async fn on_file_start(&self, file_id: FileId, name: String, size: u64);

    async fn on_chunk(&self, file_id: FileId, payload: Vec<u8>, percentage: u32, segment: u32);

    async fn on_chunk_ack(&self, file_id: FileId, segment: u32);

    async fn on_file_end(&self, file_id: FileId, filename: String);
}

async fn route(handler: &dyn MessageHandler, msg: WireMessage) {
    match msg {
        WireMessage::Chat {
            data,
            username,
            date,
        } => handler.on_chat(data, username, date).await,
        WireMessage::FileStart { id, name, size } => handler.on_file_start(id, name, size).await,
        WireMessage::Chunk {
            file_id,
            chunk,
            percentage,
            segment,
        } => handler.on_chunk(file_id, chunk, percentage, segment).await,
        WireMessage::ChunkAck { file_id, segment } => {
            handler.on_chunk_ack(file_id, segment).await
        }
        WireMessage::FileEnd { file_id, filename } => {
            handler.on_file_end(file_id, filename).await
        }
    }
}

/// Owns the reader task of the current data channel.
///
/// Installing on a replacement channel aborts the previous reader.
#[derive(Debug, Default)]
pub struct Dispatcher {
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start reading `channel`. Returns `false` if its inbound stream was
    /// already claimed by someone else.
    pub fn install(&self, channel: Arc<dyn DataChannel>, handler: Arc<dyn MessageHandler>) -> bool {
        let Some(mut incoming) = channel.take_incoming() else {
            warn!(
                event = "dispatcher_install_skipped",
                channel = %channel.label(),
                "Inbound stream already taken"
            );
            return false;
        };

        let label = channel.label().to_string();
        let task = tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                match decode(&text) {
                    Ok(Some(msg)) => {
                        trace!(event = "message_received", channel = %label, tag = msg.tag());
                        route(handler.as_ref(), msg).await
                    }
                    Ok(None) => {
                        debug!(event = "unknown_message_tag", channel = %label, "Ignoring message with unknown tag");
                    }
                    Err(e) => {
                        warn!(event = "malformed_message", channel = %label, error = %e, "Dropping malformed message");
                    }
                }
            }
            debug!(event = "dispatcher_stream_ended", channel = %label);
        });

        if let Ok(mut slot) = self.reader.lock()
            && let Some(previous) = slot.replace(task)
        {
            previous.abort();
        }
        true
    }

    pub fn uninstall(&self) {
        if let Ok(mut slot) = self.reader.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.uninstall();
    }
}
