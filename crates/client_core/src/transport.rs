use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::{error::TransportError, negotiator::TransportCredential};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SideChannelOpen,
    SideChannelMessage(Vec<u8>),
    SideChannelClosed,
    SideChannelError(String),
    RemoteTrack { kind: String },
    PeerStateChanged(PeerState),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Captured local input (microphone) that can be attached to a peer.
#[async_trait]
pub trait LocalMedia: Send + Sync {
    fn label(&self) -> String;
    async fn stop(&self) -> Result<(), TransportError>;
    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
pub trait SideChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn add_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<(), TransportError>;
    async fn open_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>, TransportError>;
    async fn create_offer(&self) -> Result<String, TransportError>;
    async fn apply_answer(&self, sdp: String) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, TransportError>;
    async fn connect(
        &self,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerSession>, TransportError>;
}

pub struct MissingPeerConnector;

#[async_trait]
impl PeerConnector for MissingPeerConnector {
    async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, TransportError> {
        Err(TransportError::Media(
            "no media backend configured; build with the `webrtc` feature".into(),
        ))
    }

    async fn connect(
        &self,
        _events: TransportEventSender,
    ) -> Result<Arc<dyn PeerSession>, TransportError> {
        Err(TransportError::PeerConnection(
            "no peer connection backend configured".into(),
        ))
    }
}

/// Trades a local SDP offer for the remote answer.
#[async_trait]
pub trait SignalingExchange: Send + Sync {
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &TransportCredential,
        model: &str,
    ) -> Result<String, TransportError>;
}

pub struct HttpSignaling {
    http: Client,
    realtime_url: Url,
}

impl HttpSignaling {
    pub fn new(realtime_url: &str) -> Result<Self, TransportError> {
        Self::with_client(Client::new(), realtime_url)
    }

    pub fn with_client(http: Client, realtime_url: &str) -> Result<Self, TransportError> {
        let realtime_url = Url::parse(realtime_url).map_err(|err| {
            TransportError::Request(format!("invalid realtime url {realtime_url:?}: {err}"))
        })?;
        Ok(Self { http, realtime_url })
    }

    pub fn offer_url(&self, model: &str) -> Url {
        let mut url = self.realtime_url.clone();
        url.query_pairs_mut().append_pair("model", model);
        url
    }
}

#[async_trait]
impl SignalingExchange for HttpSignaling {
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &TransportCredential,
        model: &str,
    ) -> Result<String, TransportError> {
        let url = self.offer_url(model);
        debug!(%url, offer_len = offer_sdp.len(), "posting sdp offer");
        let response = self
            .http
            .post(url)
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Signaling {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
