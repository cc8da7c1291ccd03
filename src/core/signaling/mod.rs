//! Signaling port: the narrow interface to the external rendezvous store.
//!
//! The store persists the offer, publishes the answer and streams trickled
//! candidates. It carries no transfer logic. Every watch returns an explicit
//! [`Subscription`] that the caller owns and cancels.

mod dir;
#[cfg(test)]
pub(crate) mod memory;

pub use dir::DirSignaling;

use crate::core::error::SignalingError;
use crate::core::model::{Candidate, PeerDescription, PeerRole, SessionId};
use crate::utils::sos::SignalOfStop;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait SignalingPort: Send + Sync {
    /// Persist the offer; the store assigns the session id.
    async fn create_session(&self, offer: &PeerDescription) -> Result<SessionId, SignalingError>;

    async fn publish_answer(
        &self,
        session: &SessionId,
        answer: &PeerDescription,
    ) -> Result<(), SignalingError>;

    /// Delivers the answer once it appears. May re-deliver on later changes.
    async fn watch_for_answer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError>;

    /// Delivers the offer once it appears. May re-deliver on later changes.
    async fn watch_for_offer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError>;

    async fn publish_candidate(
        &self,
        session: &SessionId,
        origin: PeerRole,
        candidate: &Candidate,
    ) -> Result<(), SignalingError>;

    /// Streams each distinct candidate published by `origin` exactly once.
    async fn watch_for_candidates(
        &self,
        session: &SessionId,
        origin: PeerRole,
    ) -> Result<Subscription<Candidate>, SignalingError>;
}

// ── Subscription ─────────────────────────────────────────────────────────────

/// Receiving end of a signaling watch.
///
/// Cancelling (explicitly or by drop) tells the producer to stop; items
/// already queued are discarded.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    stop: SignalOfStop,
}

/// Producer half handed to the store implementation.
#[derive(Debug)]
pub struct Publisher<T> {
    tx: mpsc::UnboundedSender<T>,
    stop: SignalOfStop,
}

impl<T> Subscription<T> {
    pub fn channel() -> (Publisher<T>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = SignalOfStop::new();
        (
            Publisher {
                tx,
                stop: stop.clone(),
            },
            Subscription { rx, stop },
        )
    }

    /// Next delivered item, or `None` once cancelled or the producer is gone.
    pub async fn next(&mut self) -> Option<T> {
        if self.stop.cancelled() {
            return None;
        }
        self.stop.select(self.rx.recv()).await.flatten()
    }

    pub fn cancel(&self) {
        self.stop.cancel();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl<T> Publisher<T> {
    /// Forward one item. Returns `false` once the subscriber is gone.
    pub fn publish(&self, item: T) -> bool {
        !self.stop.cancelled() && self.tx.send(item).is_ok()
    }

    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.stop.wait() => {}
            _ = self.tx.closed() => {}
        }
    }
}
