//! Directory-backed signaling store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<session>/offer.json
//! <root>/<session>/answer.json
//! <root>/<session>/candidates/<origin>-<uuid>.json
//! ```
//!
//! Documents are written atomically and watched by polling, so two processes
//! sharing the directory (same machine or a network mount) can rendezvous.

use super::{Publisher, SignalingPort, Subscription};
use crate::core::config::SIGNALING_POLL_INTERVAL;
use crate::core::error::SignalingError;
use crate::core::model::{Candidate, PeerDescription, PeerRole, SessionId};
use crate::utils::atomic_write::atomic_write;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const OFFER_FILE: &str = "offer.json";
const ANSWER_FILE: &str = "answer.json";
const CANDIDATES_DIR: &str = "candidates";

#[derive(Debug, Clone)]
pub struct DirSignaling {
    root: PathBuf,
    poll_interval: Duration,
}

impl DirSignaling {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: SIGNALING_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Directory of `session`. The id must be a single plain path component.
    fn session_dir(&self, session: &SessionId) -> Result<PathBuf, SignalingError> {
        let id = session.as_str();
        let plain = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(SignalingError::Rejected(format!("invalid session id {id:?}")));
        }
        Ok(self.root.join(id))
    }

    async fn existing_session(&self, session: &SessionId) -> Result<PathBuf, SignalingError> {
        let dir = self.session_dir(session)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(SignalingError::SessionNotFound(session.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SignalingError::SessionNotFound(session.clone()))
            }
            Err(e) => Err(SignalingError::Unreachable(e.to_string())),
        }
    }

    async fn watch_document(
        &self,
        session: &SessionId,
        file: &'static str,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        let path = self.existing_session(session).await?.join(file);
        let (publisher, sub) = Subscription::channel();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<PeerDescription> = None;
            loop {
                match read_json::<PeerDescription>(&path).await {
                    Ok(Some(doc)) if last.as_ref() != Some(&doc) => {
                        if !publisher.publish(doc.clone()) {
                            return;
                        }
                        last = Some(doc);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(event = "signaling_read_error", path = %path.display(), %e, "Skipping unreadable signaling document");
                    }
                }
                if !sleep_or_cancel(interval, &publisher).await {
                    return;
                }
            }
        });
        Ok(sub)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SignalingError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), SignalingError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes).await?;
    Ok(())
}

async fn sleep_or_cancel<T>(interval: Duration, publisher: &Publisher<T>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = publisher.cancelled() => false,
    }
}

fn candidate_prefix(origin: PeerRole) -> String {
    format!("{origin}-")
}

#[async_trait]
impl SignalingPort for DirSignaling {
    async fn create_session(&self, offer: &PeerDescription) -> Result<SessionId, SignalingError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SignalingError::Unreachable(format!("{}: {e}", self.root.display())))?;

        let session = SessionId::new(Uuid::new_v4().simple().to_string());
        let dir = self.session_dir(&session)?;
        tokio::fs::create_dir(&dir).await?;
        tokio::fs::create_dir(dir.join(CANDIDATES_DIR)).await?;
        write_json(&dir.join(OFFER_FILE), offer).await?;

        debug!(event = "session_created", %session, root = %self.root.display());
        Ok(session)
    }

    async fn publish_answer(
        &self,
        session: &SessionId,
        answer: &PeerDescription,
    ) -> Result<(), SignalingError> {
        let dir = self.existing_session(session).await?;
        write_json(&dir.join(ANSWER_FILE), answer).await
    }

    async fn watch_for_answer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        self.watch_document(session, ANSWER_FILE).await
    }

    async fn watch_for_offer(
        &self,
        session: &SessionId,
    ) -> Result<Subscription<PeerDescription>, SignalingError> {
        self.watch_document(session, OFFER_FILE).await
    }

    async fn publish_candidate(
        &self,
        session: &SessionId,
        origin: PeerRole,
        candidate: &Candidate,
    ) -> Result<(), SignalingError> {
        let dir = self.existing_session(session).await?.join(CANDIDATES_DIR);
        let name = format!("{}{}.json", candidate_prefix(origin), Uuid::new_v4().simple());
        write_json(&dir.join(name), candidate).await
    }

    async fn watch_for_candidates(
        &self,
        session: &SessionId,
        origin: PeerRole,
    ) -> Result<Subscription<Candidate>, SignalingError> {
        let dir = self.existing_session(session).await?.join(CANDIDATES_DIR);
        let (publisher, sub) = Subscription::channel();
        let interval = self.poll_interval;
        let prefix = candidate_prefix(origin);
        tokio::spawn(async move {
            let mut seen: HashSet<String> = HashSet::new();
            loop {
                match fresh_candidate_files(&dir, &prefix, &seen).await {
                    Ok(names) => {
                        for name in names {
                            match read_json::<Candidate>(&dir.join(&name)).await {
                                Ok(Some(candidate)) => {
                                    seen.insert(name);
                                    if !publisher.publish(candidate) {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!(event = "candidate_read_error", file = %name, %e, "Skipping unreadable candidate");
                                    seen.insert(name);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(event = "candidate_list_error", dir = %dir.display(), %e, "Cannot list candidates");
                    }
                }
                if !sleep_or_cancel(interval, &publisher).await {
                    return;
                }
            }
        });
        Ok(sub)
    }
}

async fn fresh_candidate_files(
    dir: &Path,
    prefix: &str,
    seen: &HashSet<String>,
) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && name.ends_with(".json") && !seen.contains(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
