//! Push notifications from a session to the application.

use crate::core::chat::ChatMessage;
use crate::core::model::{ConnectionState, User};
use crate::core::protocol::FileId;
use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    RemoteUser(User),
    ChatReceived(ChatMessage),

    // ── Incoming files ───────────────────────────────────────────────────────
    FileStarted {
        file_id: FileId,
        name: String,
        size: u64,
    },
    FileProgress {
        file_id: FileId,
        name: String,
        progress: u32,
    },
    FileReceived {
        file_id: FileId,
        name: String,
        data: Bytes,
    },

    // ── Outgoing files ───────────────────────────────────────────────────────
    SendProgress {
        file_id: FileId,
        name: String,
        sent_chunks: u32,
        total_chunks: u32,
    },
    SendComplete {
        file_id: FileId,
        name: String,
    },

    TransferFailed {
        file_id: FileId,
        reason: String,
    },
    /// The transport reported an unrecoverable failure.
    TransportFailed,
    Error(String),
}

pub type AppTx = Option<mpsc::UnboundedSender<SessionEvent>>;

pub(crate) fn notify_app(app_tx: &AppTx, event: SessionEvent) {
    if let Some(tx) = app_tx {
        let _ = tx.send(event);
    }
}
