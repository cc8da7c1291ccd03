//! In-process signaling store for tests.
//!
//! Mirrors the semantics of a document store with change listeners: every
//! change re-invokes description watchers, candidate watchers see each added
//! candidate once.

use super::{Publisher, SignalingPort, Subscription};
use crate::core::error::SignalingError;
use crate::core::model::{Candidate, PeerDescription, PeerRole, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct SessionDoc {
    offer: Option<PeerDescription>,
    answer: Option<PeerDescription>,
    candidates: Vec<(PeerRole, Candidate)>,
}

#[derive(Debug, Default)]
pub(crate) struct MemorySignaling {
    sessions: Mutex<HashMap<SessionId, watch::Sender<SessionDoc>>>,
    unreachable: AtomicBool,
}

impl MemorySignaling {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store were offline.
    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
    }

    /// Register a session whose offer has not been written yet.
    pub(crate) fn open_session_without_offer(&self) -> SessionId {
        let id = SessionId::new(Uuid::new_v4().simple().to_string());
        let (tx, _) = watch::channel(SessionDoc::default());
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id.clone(), tx);
        }
        id
    }

    /// Candidates published so far by `origin`.
    pub(crate) fn candidates(&self, session: &SessionId, origin: PeerRole) -> Vec<Candidate> {
        self.doc(session)
            .map(|tx| {
                tx.borrow()
                    .candidates
                    .iter()
                    .filter(|(o, _)| *o == origin)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Touch the document without changing it, re-invoking description watchers.
    pub(crate) fn poke(&self, session: &SessionId) {
        if let Some(tx) = self.doc(session) {
            tx.send_modify(|_| {});
        }
    }

    fn check_reachable(&self) -> Result<(), SignalingError> {
        if self.unreachable.load(Ordering::Acquire) {
            return Err(SignalingError::Unreachable("memory store offline".into()));
        }
        Ok(())
    }

    fn doc(&self, session: &SessionId) -> Option<watch::Sender<SessionDoc>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|map| map.get(session).cloned())
    }

    fn existing(&self, session: &SessionId) -> Result<watch::Sender<SessionDoc>, SignalingError> {
        self.check_reachable()?;
        self.doc(session)
            .ok_or_else(|| SignalingError::SessionNotFound(session.clone()))
    }

    fn watch_description(
        &self,
        session: &SessionId,
        pick: fn(&SessionDoc) -> Option<PeerDescription>,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        let mut rx = self.existing(session)?.subscribe();
        let (publisher, sub) = Subscription::channel();
        tokio::spawn(async move {
            loop {
                let current = pick(&rx.borrow_and_update());
                if let Some(desc) = current {
                    if !publisher.publish(desc) {
                        return;
                    }
                }
                if !next_change(&mut rx, &publisher).await {
                    return;
                }
            }
        });
        Ok(sub)
    }
}

async fn next_change<T>(rx: &mut watch::Receiver<SessionDoc>, publisher: &Publisher<T>) -> bool {
    tokio::select! {
        changed = rx.changed() => changed.is_ok(),
        _ = publisher.cancelled() => false,
    }
}

#[async_trait]
impl SignalingPort for MemorySignaling {
    async fn create_session(&self, offer: &PeerDescription) -> Result<SessionId, SignalingError> {
        self.check_reachable()?;
        let id = SessionId::new(Uuid::new_v4().simple().to_string());
        let (tx, _) = watch::channel(SessionDoc {
            offer: Some(offer.clone()),
            ..Default::default()
        });
        self.sessions
            .lock()
            .map_err(|_| SignalingError::Rejected("store poisoned".into()))?
            .insert(id.clone(), tx);
        Ok(id)
    }

    async fn publish_answer(
        &self,
        session: &SessionId,
        answer: &PeerDescription,
    ) -> Result<(), SignalingError> {
        let tx = self.existing(session)?;
        tx.send_modify(|doc| doc.answer = Some(answer.clone()));
        Ok(())
    }

    async fn watch_for_answer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        self.watch_description(session, |doc| doc.answer.clone())
    }

    async fn watch_for_offer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        self.watch_description(session, |doc| doc.offer.clone())
    }

    async fn publish_candidate(
        &self,
        session: &SessionId,
        origin: PeerRole,
        candidate: &Candidate,
    ) -> Result<(), SignalingError> {
        let tx = self.existing(session)?;
        tx.send_modify(|doc| doc.candidates.push((origin, candidate.clone())));
        Ok(())
    }

    async fn watch_for_candidates(
        &self,
        session: &SessionId,
        origin: PeerRole,
    ) -> Result<Subscription<Candidate>, SignalingError> {
        let mut rx = self.existing(session)?.subscribe();
        let (publisher, sub) = Subscription::channel();
        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                let fresh: Vec<(PeerRole, Candidate)> = {
                    let doc = rx.borrow_and_update();
                    let fresh = doc.candidates[seen..].to_vec();
                    seen = doc.candidates.len();
                    fresh
                };
                for (o, c) in fresh {
                    if o == origin && !publisher.publish(c) {
                        return;
                    }
                }
                if !next_change(&mut rx, &publisher).await {
                    return;
                }
            }
        });
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{SessionDescription, User};

    fn offer() -> PeerDescription {
        PeerDescription {
            description: SessionDescription::offer("v=0 offer"),
            user: User::new("a", "Alice"),
        }
    }

    #[tokio::test]
    async fn answer_is_delivered_after_publish() {
        let store = MemorySignaling::new();
        let id = store.create_session(&offer()).await.unwrap();
        let mut sub = store.watch_for_answer(&id).await.unwrap();

        let answer = PeerDescription {
            description: SessionDescription::answer("v=0 answer"),
            user: User::new("b", "Bob"),
        };
        store.publish_answer(&id, &answer).await.unwrap();
        assert_eq!(sub.next().await, Some(answer));
    }

    #[tokio::test]
    async fn touching_the_document_redelivers_the_offer() {
        let store = MemorySignaling::new();
        let id = store.create_session(&offer()).await.unwrap();
        let mut sub = store.watch_for_offer(&id).await.unwrap();

        assert_eq!(sub.next().await, Some(offer()));
        store.poke(&id);
        assert_eq!(sub.next().await, Some(offer()));
    }

    #[tokio::test]
    async fn candidates_are_filtered_by_origin() {
        let store = MemorySignaling::new();
        let id = store.create_session(&offer()).await.unwrap();
        let mut sub = store
            .watch_for_candidates(&id, PeerRole::Answerer)
            .await
            .unwrap();

        store
            .publish_candidate(&id, PeerRole::Offerer, &Candidate::new("mine"))
            .await
            .unwrap();
        store
            .publish_candidate(&id, PeerRole::Answerer, &Candidate::new("theirs"))
            .await
            .unwrap();

        assert_eq!(sub.next().await, Some(Candidate::new("theirs")));
    }

    #[tokio::test]
    async fn unreachable_store_rejects_writes() {
        let store = MemorySignaling::new();
        store.set_unreachable(true);
        let err = store.create_session(&offer()).await.unwrap_err();
        assert!(matches!(err, SignalingError::Unreachable(_)));
    }
}
