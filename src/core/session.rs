//! Connection lifecycle manager.
//!
//! Drives one peer session from `Disconnected` to `Connected`: offer/answer
//! through the signaling port, trickled candidates in both directions, and
//! the data channel once the transport opens it. Owns the transport, every
//! signaling subscription and every background task; `close()` releases all
//! of them.

use crate::core::chat::{ChatEntry, ChatLog, ChatMessage};
use crate::core::config::{DATA_CHANNEL_LABEL, SIGNALING_TIMEOUT};
use crate::core::error::SessionError;
use crate::core::events::{AppTx, SessionEvent, notify_app};
use crate::core::link::{Outbox, PeerLink};
use crate::core::model::{
    Candidate, ConnectionState, PeerDescription, PeerRole, SessionDescription, SessionId, User,
};
use crate::core::protocol::{Dispatcher, FileId, MessageHandler, WireMessage};
use crate::core::signaling::{SignalingPort, Subscription};
use crate::core::transfer::{InboundSnapshot, OutgoingFile, TransferConfig, TransferEngine};
use crate::core::transport::{
    ChannelReliability, DataChannel, PeerTransport, TransportEvent, TransportState,
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_label: String,
    pub reliability: ChannelReliability,
    pub signaling_timeout: Duration,
    pub transfer: TransferConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            reliability: ChannelReliability::default(),
            signaling_timeout: SIGNALING_TIMEOUT,
            transfer: TransferConfig::default(),
        }
    }
}

/// Candidate bookkeeping shared with the background tasks.
#[derive(Default)]
struct Exchange {
    session_id: Option<SessionId>,
    role: Option<PeerRole>,
    /// Local candidates gathered before a session id existed.
    buffered_local: Vec<Candidate>,
    /// Remote candidates that arrived before the remote description.
    queued_remote: Vec<Candidate>,
    seen_remote: HashSet<Candidate>,
    remote_committed: bool,
    remote_users: Vec<User>,
}

struct Shared {
    user: User,
    config: SessionConfig,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingPort>,
    state: watch::Sender<ConnectionState>,
    exchange: Mutex<Exchange>,
    outbox: Arc<Outbox>,
    transfers: Arc<TransferEngine>,
    chat: Arc<ChatLog>,
    link: Arc<PeerLink>,
    dispatcher: Dispatcher,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    pump_started: AtomicBool,
    closed: AtomicBool,
    app_tx: AppTx,
}

pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        user: User,
        transport: Arc<dyn PeerTransport>,
        signaling: Arc<dyn SignalingPort>,
        config: SessionConfig,
        app_tx: AppTx,
    ) -> Self {
        let outbox = Arc::new(Outbox::new());
        let transfers = Arc::new(TransferEngine::new(
            outbox.clone(),
            config.transfer,
            app_tx.clone(),
        ));
        let chat = Arc::new(ChatLog::new());
        let link = Arc::new(PeerLink::new(chat.clone(), transfers.clone(), app_tx.clone()));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                user,
                config,
                transport,
                signaling,
                state,
                exchange: Mutex::new(Exchange::default()),
                outbox,
                transfers,
                chat,
                link,
                dispatcher: Dispatcher::new(),
                tasks: std::sync::Mutex::new(Vec::new()),
                pump_started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                app_tx,
            }),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn user(&self) -> &User {
        &self.shared.user
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.shared.exchange.lock().await.session_id.clone()
    }

    pub async fn remote_users(&self) -> Vec<User> {
        self.shared.exchange.lock().await.remote_users.clone()
    }

    pub async fn chat_messages(&self) -> Vec<ChatMessage> {
        self.shared.chat.messages().await
    }

    pub async fn chat_log(&self) -> Vec<ChatEntry> {
        self.shared.chat.entries().await
    }

    pub async fn inbound_transfers(&self) -> Vec<InboundSnapshot> {
        self.shared.transfers.inbound_snapshots().await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start a session as the offering side. Returns once the offer is
    /// stored; the answer is applied in the background.
    pub async fn initiate(&self) -> Result<SessionId, SessionError> {
        let shared = &self.shared;
        shared.ensure_open()?;
        shared.enter(ConnectionState::Disconnected, ConnectionState::CreatingOffer)?;
        shared.start_event_pump();

        let channel = shared
            .transport
            .create_data_channel(&shared.config.channel_label, shared.config.reliability)
            .await
            .map_err(SessionError::Transport)?;
        shared.attach_channel(channel).await;

        let offer = shared
            .transport
            .create_offer()
            .await
            .map_err(SessionError::Transport)?;
        let session_id = shared
            .signaling
            .create_session(&PeerDescription {
                description: offer.clone(),
                user: shared.user.clone(),
            })
            .await?;
        info!(event = "session_created", session = %session_id, "Offer stored");

        shared
            .bind_session(session_id.clone(), PeerRole::Offerer)
            .await;
        shared
            .watch_remote_candidates(&session_id, PeerRole::Offerer)
            .await?;
        let mut answers = shared.signaling.watch_for_answer(&session_id).await?;
        shared.set_state_unless_connected(ConnectionState::Connecting);

        let task_shared = shared.clone();
        shared.spawn(async move {
            let Some(answer) = answers.next().await else {
                debug!(event = "answer_watch_ended");
                return;
            };
            answers.cancel();
            if let Err(e) = task_shared.apply_answer(offer, answer).await {
                error!(event = "apply_answer_failed", error = %e);
                notify_app(&task_shared.app_tx, SessionEvent::Error(e.to_string()));
            }
        });

        Ok(session_id)
    }

    /// Join an existing session as the answering side.
    ///
    /// On failure the manager is back in `Disconnected` with no session
    /// bound, so the call can be retried.
    pub async fn join(&self, session_id: SessionId) -> Result<(), SessionError> {
        let shared = &self.shared;
        shared.ensure_open()?;
        shared.expect_state(ConnectionState::Disconnected)?;

        let role = PeerRole::Answerer;
        let candidates = shared
            .signaling
            .watch_for_candidates(&session_id, role.remote())
            .await?;
        let offers = shared.signaling.watch_for_offer(&session_id).await?;

        shared.enter(
            ConnectionState::Disconnected,
            ConnectionState::WaitingForCandidate,
        )?;
        shared.start_event_pump();
        shared
            .bind_session(session_id.clone(), role)
            .await;
        let watcher = shared.spawn_candidate_watcher(candidates);

        let result = shared.answer_offer(&session_id, offers).await;
        if let Err(e) = &result {
            warn!(event = "join_failed", session = %session_id, error = %e);
            watcher.abort();
            shared.rollback_join().await;
        }
        result
    }

    /// Tear the session down. Safe from any state and idempotent.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.abort_tasks();
        shared.dispatcher.uninstall();
        shared.outbox.detach().await;
        shared.transfers.cancel_all().await;
        if let Err(e) = shared.transport.close().await {
            warn!(event = "transport_close_failed", error = %e);
        }
        shared.set_state(ConnectionState::Disconnected);
        info!(event = "session_closed");
    }

    // ── Messaging ────────────────────────────────────────────────────────────

    /// Send a chat line and record it locally once it is on the wire.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let message = ChatMessage {
            text: text.into(),
            sender: shared.user.name.clone(),
            date: Utc::now(),
        };
        shared
            .outbox
            .send(&WireMessage::Chat {
                data: message.text.clone(),
                username: message.sender.clone(),
                date: message.date,
            })
            .await?;
        shared.chat.push_message(message).await;
        Ok(())
    }

    /// Send a file and wait until the peer acknowledged every chunk.
    pub async fn send_file(&self, file: OutgoingFile) -> Result<(), SessionError> {
        self.shared.ensure_open()?;
        Ok(self.shared.transfers.send_file(file).await?)
    }

    pub async fn cancel_outbound(&self, file_id: &FileId) -> bool {
        self.shared.transfers.cancel_outbound(file_id).await
    }

    pub async fn outbound_transfers(&self) -> Vec<FileId> {
        self.shared.transfers.outbound_ids().await
    }

    pub async fn cancel_inbound(&self, file_id: &FileId) -> bool {
        self.shared.transfers.cancel_inbound(file_id).await
    }

    pub async fn save_received(&self, file_id: &FileId, dir: &Path) -> Result<PathBuf, SessionError> {
        Ok(self.shared.transfers.save_received(file_id, dir).await?)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shared.abort_tasks();
    }
}

impl Shared {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
        if changed {
            info!(event = "session_state", state = %next);
            notify_app(&self.app_tx, SessionEvent::StateChanged(next));
        }
    }

    /// Like `set_state`, but never moves a connected session backwards.
    fn set_state_unless_connected(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|s| {
            if *s == next || *s == ConnectionState::Connected {
                return false;
            }
            *s = next;
            true
        });
        if changed {
            info!(event = "session_state", state = %next);
            notify_app(&self.app_tx, SessionEvent::StateChanged(next));
        }
    }

    /// Move `from` → `to`, or fail with `InvalidState`.
    fn enter(&self, from: ConnectionState, to: ConnectionState) -> Result<(), SessionError> {
        let mut actual = from;
        let ok = self.state.send_if_modified(|s| {
            actual = *s;
            if *s != from {
                return false;
            }
            *s = to;
            true
        });
        if !ok {
            return Err(SessionError::InvalidState {
                expected: from,
                actual,
            });
        }
        info!(event = "session_state", state = %to);
        notify_app(&self.app_tx, SessionEvent::StateChanged(to));
        Ok(())
    }

    fn expect_state(&self, expected: ConnectionState) -> Result<(), SessionError> {
        let actual = *self.state.borrow();
        if actual != expected {
            return Err(SessionError::InvalidState { expected, actual });
        }
        Ok(())
    }

    fn spawn<F>(&self, fut: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let abort = handle.abort_handle();
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
        abort
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    async fn attach_channel(&self, channel: Arc<dyn DataChannel>) {
        info!(event = "data_channel_attached", channel = %channel.label());
        let handler: Arc<dyn MessageHandler> = self.link.clone();
        self.dispatcher.install(channel.clone(), handler);
        self.outbox.attach(channel).await;
    }

    // ── Transport events ─────────────────────────────────────────────────────

    fn start_event_pump(self: &Arc<Self>) {
        if self.pump_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut events) = self.transport.take_events() else {
            warn!(event = "transport_events_taken", "Transport event stream unavailable");
            return;
        };
        let shared = self.clone();
        self.spawn(async move {
            while let Some(event) = events.recv().await {
                shared.on_transport_event(event).await;
            }
        });
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate).await,
            TransportEvent::StateChanged(TransportState::Connected) => {
                self.set_state(ConnectionState::Connected);
            }
            TransportEvent::StateChanged(TransportState::Failed) => {
                error!(event = "transport_failed", "Peer connection failed");
                notify_app(&self.app_tx, SessionEvent::TransportFailed);
            }
            TransportEvent::StateChanged(other) => {
                debug!(event = "transport_state", state = ?other);
            }
            TransportEvent::DataChannel(channel) => self.attach_channel(channel).await,
        }
    }

    async fn on_local_candidate(&self, candidate: Candidate) {
        let target = {
            let mut ex = self.exchange.lock().await;
            match (&ex.session_id, ex.role) {
                (Some(id), Some(role)) => Some((id.clone(), role)),
                _ => {
                    ex.buffered_local.push(candidate.clone());
                    None
                }
            }
        };
        if let Some((id, role)) = target {
            self.publish_local(&id, role, &candidate).await;
        }
    }

    async fn publish_local(&self, session: &SessionId, role: PeerRole, candidate: &Candidate) {
        match self.signaling.publish_candidate(session, role, candidate).await {
            Ok(()) => debug!(event = "candidate_published", session = %session),
            Err(e) => warn!(event = "candidate_publish_failed", session = %session, error = %e),
        }
    }

    /// Record the session and flush candidates gathered before it existed.
    async fn bind_session(&self, session_id: SessionId, role: PeerRole) {
        let buffered = {
            let mut ex = self.exchange.lock().await;
            ex.session_id = Some(session_id.clone());
            ex.role = Some(role);
            std::mem::take(&mut ex.buffered_local)
        };
        for candidate in buffered {
            self.publish_local(&session_id, role, &candidate).await;
        }
    }

    // ── Remote side ──────────────────────────────────────────────────────────

    /// Follow the candidates the other side of `role` publishes.
    async fn watch_remote_candidates(
        self: &Arc<Self>,
        session_id: &SessionId,
        role: PeerRole,
    ) -> Result<(), SessionError> {
        let candidates = self
            .signaling
            .watch_for_candidates(session_id, role.remote())
            .await?;
        self.spawn_candidate_watcher(candidates);
        Ok(())
    }

    fn spawn_candidate_watcher(
        self: &Arc<Self>,
        mut candidates: Subscription<Candidate>,
    ) -> AbortHandle {
        let shared = self.clone();
        self.spawn(async move {
            while let Some(candidate) = candidates.next().await {
                shared.on_remote_candidate(candidate).await;
            }
        })
    }

    /// Wait for the offer, commit it and publish our answer.
    async fn answer_offer(
        &self,
        session_id: &SessionId,
        mut offers: Subscription<PeerDescription>,
    ) -> Result<(), SessionError> {
        let offer = timeout(self.config.signaling_timeout, offers.next())
            .await
            .map_err(|_| SessionError::Timeout("offer"))?;
        offers.cancel();
        let offer = match offer {
            Some(offer) => offer,
            None if self.closed.load(Ordering::Acquire) => return Err(SessionError::Closed),
            None => return Err(SessionError::Timeout("offer")),
        };

        self.commit_remote(offer).await?;
        let answer = self
            .transport
            .create_answer()
            .await
            .map_err(SessionError::Transport)?;
        self.transport
            .set_local_description(answer.clone())
            .await
            .map_err(SessionError::Transport)?;
        self.signaling
            .publish_answer(
                session_id,
                &PeerDescription {
                    description: answer,
                    user: self.user.clone(),
                },
            )
            .await?;
        info!(event = "answer_published", session = %session_id);
        self.set_state_unless_connected(ConnectionState::Connecting);
        Ok(())
    }

    /// Undo a failed `join`: unbind the session and forget its candidates.
    async fn rollback_join(&self) {
        {
            let mut ex = self.exchange.lock().await;
            ex.session_id = None;
            ex.role = None;
            ex.queued_remote.clear();
            ex.seen_remote.clear();
        }
        if !self.closed.load(Ordering::Acquire) {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn on_remote_candidate(&self, candidate: Candidate) {
        {
            let mut ex = self.exchange.lock().await;
            if !ex.seen_remote.insert(candidate.clone()) {
                debug!(event = "candidate_duplicate");
                return;
            }
            if !ex.remote_committed {
                ex.queued_remote.push(candidate);
                return;
            }
        }
        self.apply_candidate(candidate).await;
    }

    async fn apply_candidate(&self, candidate: Candidate) {
        if let Err(e) = self.transport.add_remote_candidate(candidate).await {
            warn!(event = "candidate_apply_failed", error = %e);
        }
    }

    /// Commit the remote description once; later deliveries are ignored.
    async fn commit_remote(&self, remote: PeerDescription) -> Result<(), SessionError> {
        if self.exchange.lock().await.remote_committed {
            debug!(event = "remote_description_ignored");
            return Ok(());
        }
        self.transport
            .set_remote_description(remote.description)
            .await
            .map_err(SessionError::Transport)?;

        let queued = {
            let mut ex = self.exchange.lock().await;
            ex.remote_committed = true;
            ex.remote_users.push(remote.user.clone());
            std::mem::take(&mut ex.queued_remote)
        };
        info!(
            event = "remote_description_set",
            remote_user = %remote.user.name,
            queued_candidates = queued.len(),
        );
        notify_app(&self.app_tx, SessionEvent::RemoteUser(remote.user));
        for candidate in queued {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    async fn apply_answer(
        &self,
        offer: SessionDescription,
        answer: PeerDescription,
    ) -> Result<(), SessionError> {
        self.transport
            .set_local_description(offer)
            .await
            .map_err(SessionError::Transport)?;
        self.commit_remote(answer).await
    }
}
