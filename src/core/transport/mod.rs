//! Peer transport abstraction.
//!
//! The session manager drives connection setup through [`PeerTransport`] and
//! moves application frames through [`DataChannel`]. Callbacks of the
//! underlying stack are turned into one [`TransportEvent`] stream owned by
//! the manager.

#[cfg(test)]
pub(crate) mod loopback;
mod webrtc;

pub use self::webrtc::WebRtcTransport;

use crate::core::model::{Candidate, SessionDescription};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

pub enum TransportEvent {
    /// A local candidate was gathered and should be trickled to the remote.
    LocalCandidate(Candidate),
    StateChanged(TransportState),
    /// The remote side opened a data channel.
    DataChannel(Arc<dyn DataChannel>),
}

impl Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
            Self::DataChannel(ch) => f.debug_tuple("DataChannel").field(&ch.label()).finish(),
        }
    }
}

/// Delivery mode of the application data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelReliability {
    /// Ordered and fully reliable.
    #[default]
    Reliable,
    /// Unordered with bounded retransmissions. The file-transfer acks and
    /// retransmits keep transfers correct in this mode.
    Unordered { max_retransmits: u16 },
}

/// Bidirectional text message channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Send one whole text frame.
    async fn send(&self, text: String) -> Result<()>;

    /// Hand out the inbound frame stream. Only the first call gets it.
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<String>>;
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_data_channel(
        &self,
        label: &str,
        reliability: ChannelReliability,
    ) -> Result<Arc<dyn DataChannel>>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()>;

    /// Hand out the event stream. Only the first call gets it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    async fn close(&self) -> Result<()>;
}
