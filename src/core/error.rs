//! Error taxonomy of the session core.
//!
//! Transport and signaling failures surface to the caller of `initiate` /
//! `join`. Protocol anomalies never leave the engine; they are logged and
//! dropped. Transfer failures are terminal for one transfer only.

use crate::core::model::{ConnectionState, SessionId};
use crate::core::protocol::FileId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling store unreachable: {0}")]
    Unreachable(String),

    #[error("signaling write rejected: {0}")]
    Rejected(String),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("signaling I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed signaling document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer connections are not supported here: {0}")]
    TransportUnsupported(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("operation requires state {expected}, session is {actual}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    #[error("timed out waiting for the remote {0}")]
    Timeout(&'static str),

    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no string `type` tag")]
    MissingTag,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer {file_id} stalled: no ack for segment {segment}")]
    Stalled { file_id: FileId, segment: u32 },

    #[error("transfer {0} was cancelled")]
    Cancelled(FileId),

    #[error("transfer {0} is already in flight")]
    DuplicateTransfer(FileId),

    #[error("data channel not available")]
    ChannelUnavailable,

    #[error("send failed: {0:#}")]
    Send(anyhow::Error),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transfer {0} has not completed")]
    NotComplete(FileId),

    #[error("could not save received file: {0}")]
    Io(#[from] std::io::Error),
}
