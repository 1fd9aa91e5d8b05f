use std::sync::Arc;

use shared::domain::{ConnectionState, TranscriptEntry};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub mod config;
mod controller;
pub mod error;
pub mod log_sink;
pub mod negotiator;
pub mod reconciler;
pub mod transcript;
pub mod transport;
#[cfg(feature = "webrtc")]
pub mod webrtc_backend;

pub use config::{load_settings, ClientSettings};
pub use controller::ClientDependencies;
pub use error::{NegotiationError, SessionError, StartError, TeardownFailure, TransportError};
pub use log_sink::{LogLevel, LogLine, LogSink, MemoryLogSink, TracingLogSink};
pub use negotiator::{HttpSessionNegotiator, SessionNegotiator, UserIdentity};
pub use transport::{HttpSignaling, MissingPeerConnector, PeerConnector};

use controller::{spawn_controller, ControllerInput, SessionCommand};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    TranscriptChanged(Vec<TranscriptEntry>),
    Log(LogLine),
}

impl ClientDependencies {
    pub fn from_settings(
        settings: &ClientSettings,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            negotiator: Arc::new(
                HttpSessionNegotiator::new(settings.session_url.clone())
                    .with_default_model(settings.default_model.clone()),
            ),
            connector,
            signaling: Arc::new(HttpSignaling::new(&settings.realtime_url)?),
            log: Arc::new(TracingLogSink),
        })
    }
}

/// Cheap, cloneable handle to the connection controller task.
///
/// The controller shuts down, releasing any live connection, once every
/// handle has been dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    inbox: mpsc::UnboundedSender<ControllerInput>,
    state: watch::Receiver<ConnectionState>,
    transcript: watch::Receiver<Vec<TranscriptEntry>>,
    events: broadcast::Sender<ClientEvent>,
}

impl RealtimeClient {
    pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
        let deps = ClientDependencies::from_settings(&settings, default_connector())?;
        Ok(Self::new_with_dependencies(settings, deps))
    }

    pub fn new_with_dependencies(settings: ClientSettings, deps: ClientDependencies) -> Self {
        let handles = spawn_controller(settings, deps);
        Self {
            inbox: handles.inbox,
            state: handles.state,
            transcript: handles.transcript,
            events: handles.events,
        }
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Start(reply))?;
        rx.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    /// Resolves once teardown has finished. Failed teardown steps are
    /// reported but never prevent the return to idle.
    pub async fn stop(&self) -> Result<Vec<TeardownFailure>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Stop(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Returns `false` when the text was blank or the side-channel is not open.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::SendText {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn watch_transcript(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.transcript.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.inbox
            .send(ControllerInput::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

#[cfg(feature = "webrtc")]
fn default_connector() -> Arc<dyn PeerConnector> {
    Arc::new(webrtc_backend::WebRtcConnector::default())
}

#[cfg(not(feature = "webrtc"))]
fn default_connector() -> Arc<dyn PeerConnector> {
    Arc::new(MissingPeerConnector)
}
