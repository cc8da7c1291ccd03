//! In-process transports for tests.
//!
//! `LoopbackTransport::pair()` yields an offerer and an answerer that
//! "connect" once both sides hold a local and a remote description. The
//! channel the offerer created is then announced to the answerer, as a real
//! peer connection does.

use super::{ChannelReliability, DataChannel, PeerTransport, TransportEvent, TransportState};
use crate::core::model::{Candidate, PeerRole, SessionDescription};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ── Channels ─────────────────────────────────────────────────────────────────

/// One end of an in-memory channel pair.
pub(crate) struct LoopbackChannel {
    label: String,
    peer: mpsc::UnboundedSender<String>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl LoopbackChannel {
    pub(crate) fn pair(label: &str) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                label: label.to_string(),
                peer: b_tx,
                incoming: Mutex::new(Some(a_rx)),
            }),
            Arc::new(Self {
                label: label.to_string(),
                peer: a_tx,
                incoming: Mutex::new(Some(b_rx)),
            }),
        )
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, text: String) -> Result<()> {
        self.peer
            .send(text)
            .map_err(|_| anyhow!("loopback peer is gone"))
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming.lock().unwrap().take()
    }
}

/// Outbound-only channel that hands every sent frame to the test.
pub(crate) struct RecordingChannel {
    sent: mpsc::UnboundedSender<String>,
}

impl RecordingChannel {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { sent: tx }), rx)
    }
}

#[async_trait]
impl DataChannel for RecordingChannel {
    fn label(&self) -> &str {
        "recording"
    }

    async fn send(&self, text: String) -> Result<()> {
        self.sent
            .send(text)
            .map_err(|_| anyhow!("recorder dropped"))
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        None
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Side {
    local: bool,
    remote: bool,
}

struct Link {
    sides: [Side; 2],
    events: [mpsc::UnboundedSender<TransportEvent>; 2],
    pending_channel: Option<Arc<LoopbackChannel>>,
    connected: bool,
}

fn slot(role: PeerRole) -> usize {
    match role {
        PeerRole::Offerer => 0,
        PeerRole::Answerer => 1,
    }
}

pub(crate) struct LoopbackTransport {
    role: PeerRole,
    link: Arc<Mutex<Link>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    applied: Mutex<Vec<Candidate>>,
}

impl LoopbackTransport {
    pub(crate) fn pair() -> (Arc<Self>, Arc<Self>) {
        let (o_tx, o_rx) = mpsc::unbounded_channel();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(Link {
            sides: Default::default(),
            events: [o_tx, a_tx],
            pending_channel: None,
            connected: false,
        }));
        let side = |role, rx| {
            Arc::new(Self {
                role,
                link: link.clone(),
                events: Mutex::new(Some(rx)),
                applied: Mutex::new(Vec::new()),
            })
        };
        (side(PeerRole::Offerer, o_rx), side(PeerRole::Answerer, a_rx))
    }

    /// Remote candidates handed to this side so far, in order.
    pub(crate) fn applied_candidates(&self) -> Vec<Candidate> {
        self.applied.lock().unwrap().clone()
    }

    fn emit(&self, event: TransportEvent) {
        let link = self.link.lock().unwrap();
        let _ = link.events[slot(self.role)].send(event);
    }

    fn update(&self, f: impl FnOnce(&mut Side)) {
        let mut link = self.link.lock().unwrap();
        f(&mut link.sides[slot(self.role)]);

        let ready = link.sides.iter().all(|s| s.local && s.remote);
        if !ready || link.connected {
            return;
        }
        link.connected = true;
        let channel = link.pending_channel.take();
        for (i, tx) in link.events.iter().enumerate() {
            let _ = tx.send(TransportEvent::StateChanged(TransportState::Connecting));
            if i == slot(PeerRole::Answerer)
                && let Some(ch) = &channel
            {
                let _ = tx.send(TransportEvent::DataChannel(ch.clone()));
            }
            let _ = tx.send(TransportEvent::StateChanged(TransportState::Connected));
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_data_channel(
        &self,
        label: &str,
        _reliability: ChannelReliability,
    ) -> Result<Arc<dyn DataChannel>> {
        let (mine, theirs) = LoopbackChannel::pair(label);
        self.link.lock().unwrap().pending_channel = Some(theirs);
        Ok(mine)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("loopback {}", self.role)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if !self.link.lock().unwrap().sides[slot(self.role)].remote {
            return Err(anyhow!("cannot answer without a remote offer"));
        }
        Ok(SessionDescription::answer(format!("loopback {}", self.role)))
    }

    async fn set_local_description(&self, _description: SessionDescription) -> Result<()> {
        self.emit(TransportEvent::LocalCandidate(Candidate::new(format!(
            "candidate:{}-host",
            self.role
        ))));
        self.update(|s| s.local = true);
        Ok(())
    }

    async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
        self.update(|s| s.remote = true);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
        if !self.link.lock().unwrap().sides[slot(self.role)].remote {
            return Err(anyhow!("remote description not set"));
        }
        self.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().unwrap().take()
    }

    async fn close(&self) -> Result<()> {
        self.emit(TransportEvent::StateChanged(TransportState::Closed));
        Ok(())
    }
}
