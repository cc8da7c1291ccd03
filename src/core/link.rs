//! Glue between the data channel and the session's sub-protocols.
//!
//! [`Outbox`] is the single writer of the channel. [`PeerLink`] receives
//! routed frames and hands them to the chat log or the transfer engine.

use crate::core::chat::{ChatLog, ChatMessage};
use crate::core::error::TransferError;
use crate::core::events::{AppTx, SessionEvent, notify_app};
use crate::core::protocol::{FileId, MessageHandler, WireMessage, encode};
use crate::core::transfer::TransferEngine;
use crate::core::transport::DataChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

/// Serialized writer for the current data channel.
///
/// Chat and any number of transfers share one channel; sends go out one
/// whole frame at a time in call order.
#[derive(Default)]
pub struct Outbox {
    channel: RwLock<Option<Arc<dyn DataChannel>>>,
    send_lock: Mutex<()>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, channel: Arc<dyn DataChannel>) {
        *self.channel.write().await = Some(channel);
    }

    pub async fn detach(&self) {
        self.channel.write().await.take();
    }

    pub async fn send(&self, msg: &WireMessage) -> Result<(), TransferError> {
        let text = encode(msg)?;
        let channel = self
            .channel
            .read()
            .await
            .clone()
            .ok_or(TransferError::ChannelUnavailable)?;

        let _guard = self.send_lock.lock().await;
        trace!(event = "wire_send", tag = msg.tag(), bytes = text.len());
        channel.send(text).await.map_err(TransferError::Send)
    }
}

/// Inbound side of a session: routes decoded frames to their owners.
pub struct PeerLink {
    chat: Arc<ChatLog>,
    transfers: Arc<TransferEngine>,
    app_tx: AppTx,
}

impl PeerLink {
    pub fn new(chat: Arc<ChatLog>, transfers: Arc<TransferEngine>, app_tx: AppTx) -> Self {
        Self {
            chat,
            transfers,
            app_tx,
        }
    }
}

#[async_trait]
impl MessageHandler for PeerLink {
    async fn on_chat(&self, text: String, sender: String, date: DateTime<Utc>) {
        let message = ChatMessage { text, sender, date };
        self.chat.push_message(message.clone()).await;
        notify_app(&self.app_tx, SessionEvent::ChatReceived(message));
    }

    async fn on_file_start(&self, file_id: FileId, name: String, size: u64) {
        self.transfers.handle_file_start(file_id, name, size).await;
    }

    async fn on_chunk(&self, file_id: FileId, payload: Vec<u8>, percentage: u32, segment: u32) {
        self.transfers
            .handle_chunk(file_id, payload, percentage, segment)
            .await;
    }

    async fn on_chunk_ack(&self, file_id: FileId, segment: u32) {
        self.transfers.handle_ack(&file_id, segment).await;
    }

    async fn on_file_end(&self, file_id: FileId, filename: String) {
        if let Some(data) = self.transfers.handle_file_end(&file_id, &filename).await {
            self.chat
                .push_download(file_id, filename, data.len() as u64)
                .await;
        }
    }
}
