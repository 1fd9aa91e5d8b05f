use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors,
        media_engine::{MediaEngine, MIME_TYPE_OPUS},
        APIBuilder, API,
    },
    data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTCRtpCodecCapability, rtp_receiver::RTCRtpReceiver,
        rtp_sender::RTCRtpSender, RTCRtpTransceiver,
    },
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

use crate::{
    error::TransportError,
    transport::{
        LocalMedia, PeerConnector, PeerSession, PeerState, SideChannel, TransportEvent,
        TransportEventSender,
    },
};

const AUDIO_TRACK_ID: &str = "audio";
const AUDIO_STREAM_ID: &str = "realtime-client";

#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    pub ice_servers: Vec<String>,
}

impl WebRtcConnector {
    fn build_api(&self) -> Result<API, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(peer_error)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(peer_error)?;
        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, TransportError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            AUDIO_TRACK_ID.to_owned(),
            AUDIO_STREAM_ID.to_owned(),
        ));
        Ok(Arc::new(WebRtcAudioTrack {
            track,
            senders: Mutex::new(Vec::new()),
        }))
    }

    async fn connect(
        &self,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerSession>, TransportError> {
        let api = self.build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(self.configuration())
                .await
                .map_err(peer_error)?,
        );
        wire_peer_events(&pc, events.clone());
        Ok(Arc::new(WebRtcPeer { pc, events }))
    }
}

/// Opus track offered to the remote peer. Samples are written by whoever
/// owns the capture device through [`WebRtcAudioTrack::track`].
pub struct WebRtcAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl WebRtcAudioTrack {
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }
}

#[async_trait]
impl LocalMedia for WebRtcAudioTrack {
    fn label(&self) -> String {
        format!("{} ({})", self.track.id(), MIME_TYPE_OPUS)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let senders: Vec<_> = self.senders.lock().await.drain(..).collect();
        let mut first_error = None;
        for sender in senders {
            if let Err(err) = sender.stop().await {
                first_error.get_or_insert(TransportError::Media(err.to_string()));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: TransportEventSender,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn add_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<(), TransportError> {
        let audio = media
            .as_any()
            .downcast_ref::<WebRtcAudioTrack>()
            .ok_or_else(|| {
                TransportError::Media(format!("unsupported local media: {}", media.label()))
            })?;

        let track: Arc<dyn TrackLocal + Send + Sync> = audio.track();
        let sender = self.pc.add_track(track).await.map_err(peer_error)?;
        audio.senders.lock().await.push(Arc::clone(&sender));

        // RTCP has to be read for interceptors such as NACK to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn open_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>, TransportError> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|err| TransportError::SideChannel(err.to_string()))?;
        wire_data_channel(&channel, self.events.clone());
        Ok(Arc::new(WebRtcSideChannel { channel }))
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(peer_error)?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(peer_error)?;
        let _ = gather_complete.recv().await;

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| TransportError::PeerConnection("local description missing".into()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(sdp).map_err(peer_error)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(peer_error)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await.map_err(peer_error)
    }
}

struct WebRtcSideChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl SideChannel for WebRtcSideChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|err| TransportError::SideChannel(err.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel
            .close()
            .await
            .map_err(|err| TransportError::SideChannel(err.to_string()))
    }
}

fn wire_peer_events(pc: &Arc<RTCPeerConnection>, events: TransportEventSender) {
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            let state = match state {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
                RTCPeerConnectionState::Connecting => PeerState::Connecting,
                RTCPeerConnectionState::Connected => PeerState::Connected,
                RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                RTCPeerConnectionState::Failed => PeerState::Failed,
                RTCPeerConnectionState::Closed => PeerState::Closed,
            };
            debug!(target: "realtime", %state, "peer connection state changed");
            let _ = events.send(TransportEvent::PeerStateChanged(state));
        })
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let events = events.clone();
            Box::pin(async move {
                let kind = track.kind().to_string();
                info!(target: "realtime", %kind, ssrc = track.ssrc(), "remote track");
                let _ = events.send(TransportEvent::RemoteTrack { kind });
                // Playback is not handled here; drain so the receiver does not stall.
                tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
            })
        },
    ));
}

fn wire_data_channel(channel: &Arc<RTCDataChannel>, events: TransportEventSender) {
    let open_events = events.clone();
    channel.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::SideChannelOpen);
        })
    }));

    let close_events = events.clone();
    channel.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::SideChannelClosed);
        })
    }));

    let error_events = events.clone();
    let label = channel.label().to_string();
    channel.on_error(Box::new(move |err| {
        let events = error_events.clone();
        let label = label.clone();
        Box::pin(async move {
            warn!(target: "realtime", channel = %label, error = %err, "data channel error");
            let _ = events.send(TransportEvent::SideChannelError(err.to_string()));
        })
    }));

    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::SideChannelMessage(msg.data.to_vec()));
        })
    }));
}

fn peer_error(err: webrtc::Error) -> TransportError {
    TransportError::PeerConnection(err.to_string())
}
