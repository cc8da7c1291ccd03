//! [`PeerTransport`] over a webrtc-rs `RTCPeerConnection`.

use super::{ChannelReliability, DataChannel, PeerTransport, TransportEvent, TransportState};
use crate::core::config::DATA_CHANNEL_OPEN_TIMEOUT;
use crate::core::error::SessionError;
use crate::core::model::{Candidate, SdpKind, SessionDescription};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WebRtcTransport {
    /// Build a peer connection using the given STUN/TURN urls.
    pub async fn new(ice_servers: &[String]) -> Result<Self, SessionError> {
        Self::build(ice_servers)
            .await
            .map_err(|e| SessionError::TransportUnsupported(format!("{e:#}")))
    }

    async fn build(ice_servers: &[String]) -> Result<Self> {
        let api = create_webrtc_api()?;
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: ice_servers.to_vec(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        register_callbacks(&pc, tx);

        Ok(Self {
            pc,
            events: Mutex::new(Some(rx)),
        })
    }
}

fn create_webrtc_api() -> Result<webrtc::api::API> {
    let mut me = MediaEngine::default();
    let reg = register_default_interceptors(Registry::new(), &mut me)?;
    Ok(APIBuilder::new()
        .with_media_engine(me)
        .with_interceptor_registry(reg)
        .build())
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let state_tx = tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let tx = state_tx.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::New => TransportState::New,
                RTCPeerConnectionState::Connecting => TransportState::Connecting,
                RTCPeerConnectionState::Connected => {
                    info!(event = "webrtc_connected", "WebRTC connection established");
                    TransportState::Connected
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!(
                        event = "webrtc_disconnected",
                        "WebRTC transient disconnect (ICE may recover)"
                    );
                    TransportState::Disconnected
                }
                RTCPeerConnectionState::Failed => {
                    error!(event = "webrtc_failed", "WebRTC connection failed");
                    TransportState::Failed
                }
                RTCPeerConnectionState::Closed => {
                    info!(event = "webrtc_closed", "WebRTC connection closed");
                    TransportState::Closed
                }
                RTCPeerConnectionState::Unspecified => return,
            };
            let _ = tx.send(TransportEvent::StateChanged(state));
        })
    }));

    let candidate_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            let Some(c) = c else {
                debug!(event = "ice_gathering_done");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let _ = tx.send(TransportEvent::LocalCandidate(Candidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => warn!(event = "ice_candidate_encode_failed", error = %e),
            }
        })
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        Box::pin(async move {
            info!(event = "remote_data_channel", label = %dc.label(), "Remote opened data channel");
            let channel: Arc<dyn DataChannel> = WebRtcDataChannel::wrap(dc);
            let _ = tx.send(TransportEvent::DataChannel(channel));
        })
    }));
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    })
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_data_channel(
        &self,
        label: &str,
        reliability: ChannelReliability,
    ) -> Result<Arc<dyn DataChannel>> {
        let init = match reliability {
            ChannelReliability::Reliable => RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            },
            ChannelReliability::Unordered { max_retransmits } => RTCDataChannelInit {
                ordered: Some(false),
                max_retransmits: Some(max_retransmits),
                ..Default::default()
            },
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        Ok(WebRtcDataChannel::wrap(dc))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().ok()?.take()
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

// ── Data channel ─────────────────────────────────────────────────────────────

struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
    opened: Arc<Notify>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl WebRtcDataChannel {
    /// Attach handlers right away so no early frame is lost.
    fn wrap(dc: Arc<RTCDataChannel>) -> Arc<Self> {
        let label = dc.label().to_string();
        let opened = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let open_notify = opened.clone();
        let open_label = label.clone();
        dc.on_open(Box::new(move || {
            let notify = open_notify.clone();
            let label = open_label.clone();
            Box::pin(async move {
                info!(event = "data_channel_open", channel = %label);
                notify.notify_waiters();
            })
        }));

        let close_label = label.clone();
        dc.on_close(Box::new(move || {
            let label = close_label.clone();
            Box::pin(async move {
                info!(event = "data_channel_closed", channel = %label);
            })
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                if !msg.is_string {
                    debug!(event = "binary_frame", bytes = msg.data.len(), "Treating binary frame as text");
                }
                let _ = tx.send(String::from_utf8_lossy(&msg.data).into_owned());
            })
        }));

        Arc::new(Self {
            dc,
            label,
            opened,
            incoming: Mutex::new(Some(rx)),
        })
    }

    async fn wait_open(&self) -> Result<()> {
        let notified = self.opened.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        match self.dc.ready_state() {
            RTCDataChannelState::Open => return Ok(()),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed => {
                return Err(anyhow!("data channel {} is closed", self.label));
            }
            _ => {}
        }
        timeout(DATA_CHANNEL_OPEN_TIMEOUT, notified)
            .await
            .map_err(|_| anyhow!("data channel {} did not open in time", self.label))
    }
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, text: String) -> Result<()> {
        self.wait_open().await?;
        self.dc.send_text(text).await?;
        Ok(())
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming.lock().ok()?.take()
    }
}
