use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use shared::{
    domain::{ConnectionState, TranscriptEntry},
    protocol::ClientMessage,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    config::ClientSettings,
    error::{StartError, TeardownFailure, TeardownStep, TransportError},
    log_sink::{LogLine, LogSink},
    negotiator::{SessionNegotiator, UserIdentity},
    reconciler::Reconciler,
    transport::{
        LocalMedia, PeerConnector, PeerSession, PeerState, SideChannel, SignalingExchange,
        TransportEvent,
    },
    ClientEvent,
};

pub struct ClientDependencies {
    pub negotiator: Arc<dyn SessionNegotiator>,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingExchange>,
    pub log: Arc<dyn LogSink>,
}

pub(crate) enum SessionCommand {
    Start(oneshot::Sender<Result<(), StartError>>),
    Stop(oneshot::Sender<Vec<TeardownFailure>>),
    SendText {
        text: String,
        reply: oneshot::Sender<bool>,
    },
}

pub(crate) enum ControllerInput {
    Command(SessionCommand),
    Transport {
        generation: u64,
        event: TransportEvent,
    },
}

struct BroadcastLog {
    sink: Arc<dyn LogSink>,
    events: broadcast::Sender<ClientEvent>,
}

impl LogSink for BroadcastLog {
    fn record(&self, line: LogLine) {
        self.sink.record(line.clone());
        let _ = self.events.send(ClientEvent::Log(line));
    }
}

struct ActiveConnection {
    generation: u64,
    media: Option<Arc<dyn LocalMedia>>,
    peer: Option<Arc<dyn PeerSession>>,
    side_channel: Option<Arc<dyn SideChannel>>,
    side_channel_open: bool,
    forwarder: Option<JoinHandle<()>>,
}

impl ActiveConnection {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            media: None,
            peer: None,
            side_channel: None,
            side_channel_open: false,
            forwarder: None,
        }
    }
}

pub(crate) struct Controller {
    settings: ClientSettings,
    negotiator: Arc<dyn SessionNegotiator>,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingExchange>,
    log: BroadcastLog,
    state: ConnectionState,
    reconciler: Reconciler,
    connection: Option<ActiveConnection>,
    generation: u64,
    inbox: mpsc::WeakUnboundedSender<ControllerInput>,
    state_tx: watch::Sender<ConnectionState>,
    transcript_tx: watch::Sender<Vec<TranscriptEntry>>,
    events: broadcast::Sender<ClientEvent>,
}

pub(crate) struct ControllerHandles {
    pub inbox: mpsc::UnboundedSender<ControllerInput>,
    pub state: watch::Receiver<ConnectionState>,
    pub transcript: watch::Receiver<Vec<TranscriptEntry>>,
    pub events: broadcast::Sender<ClientEvent>,
}

pub(crate) fn spawn_controller(
    settings: ClientSettings,
    deps: ClientDependencies,
) -> ControllerHandles {
    let (inbox, inbox_rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(ConnectionState::Idle);
    let (transcript_tx, transcript) = watch::channel(Vec::new());
    let (events, _) = broadcast::channel(256);

    let controller = Controller {
        settings,
        negotiator: deps.negotiator,
        connector: deps.connector,
        signaling: deps.signaling,
        log: BroadcastLog {
            sink: deps.log,
            events: events.clone(),
        },
        state: ConnectionState::Idle,
        reconciler: Reconciler::new(),
        connection: None,
        generation: 0,
        inbox: inbox.downgrade(),
        state_tx,
        transcript_tx,
        events: events.clone(),
    };
    tokio::spawn(controller.run(inbox_rx));

    ControllerHandles {
        inbox,
        state,
        transcript,
        events,
    }
}

impl Controller {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ControllerInput>) {
        while let Some(input) = inbox.recv().await {
            match input {
                ControllerInput::Command(SessionCommand::Start(reply)) => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                ControllerInput::Command(SessionCommand::Stop(reply)) => {
                    let failures = self.stop().await;
                    let _ = reply.send(failures);
                }
                ControllerInput::Command(SessionCommand::SendText { text, reply }) => {
                    let accepted = self.send_text(&text).await;
                    let _ = reply.send(accepted);
                }
                ControllerInput::Transport { generation, event } => {
                    self.on_transport_event(generation, event).await;
                }
            }
        }

        debug!("all client handles dropped; shutting down controller");
        if self.state != ConnectionState::Idle {
            self.stop().await;
        }
    }

    async fn start(&mut self) -> Result<(), StartError> {
        if !self.state.can_start() {
            self.log
                .warn(&format!("start ignored: connection is {}", self.state));
            return Err(StartError::InvalidState(self.state));
        }
        self.set_state(ConnectionState::Starting);

        self.generation += 1;
        let mut connection = ActiveConnection::new(self.generation);
        let result = self.establish(&mut connection).await;
        self.connection = Some(connection);

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.log.info("connected");
                Ok(())
            }
            Err(err) => {
                self.log.error(&format!("start failed: {err}"));
                if let Some(api) = err.backend_error() {
                    warn!(code = ?api.code, detail = %api.message, "backend rejected request");
                }
                self.fail().await;
                Err(err)
            }
        }
    }

    /// Runs the handshake, parking each acquired resource in `connection` so a
    /// failure part-way through can release exactly what exists.
    async fn establish(&self, connection: &mut ActiveConnection) -> Result<(), StartError> {
        self.log.info("requesting session...");
        let identity =
            UserIdentity::new(self.settings.user_id.clone()).with_room(self.settings.room.clone());
        let session = self.negotiator.negotiate(&identity).await?;
        self.log
            .info(&format!("got token; model={}", session.routing.model));

        self.log.info("requesting microphone...");
        let media = self.connector.acquire_local_media().await?;
        connection.media = Some(Arc::clone(&media));
        self.log.info(&format!("local media ready: {}", media.label()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = self.connector.connect(events_tx).await?;
        connection.forwarder = Some(spawn_event_forwarder(
            connection.generation,
            events_rx,
            self.inbox.clone(),
        ));
        connection.peer = Some(Arc::clone(&peer));

        peer.add_local_media(media).await?;
        let side_channel = peer
            .open_side_channel(&self.settings.data_channel_label)
            .await?;
        connection.side_channel = Some(side_channel);

        let offer = peer.create_offer().await?;
        self.log.info("sending offer...");
        let answer = self
            .signaling
            .exchange(&offer, &session.credential, &session.routing.model)
            .await?;
        peer.apply_answer(answer).await?;
        Ok(())
    }

    async fn stop(&mut self) -> Vec<TeardownFailure> {
        if self.state == ConnectionState::Idle {
            return Vec::new();
        }
        self.set_state(ConnectionState::Stopping);
        self.log.info("stopping...");
        let failures = self.release().await;
        self.set_state(ConnectionState::Idle);
        self.log.info("stopped");
        failures
    }

    async fn fail(&mut self) {
        self.release().await;
        self.set_state(ConnectionState::Error);
    }

    /// Tears down whatever the current connection holds. Every step runs even
    /// when an earlier one errors or panics.
    async fn release(&mut self) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();
        if let Some(connection) = self.connection.take() {
            if let Some(forwarder) = connection.forwarder {
                forwarder.abort();
            }
            if let Some(channel) = connection.side_channel {
                failures.extend(guarded(TeardownStep::SideChannel, channel.close()).await);
            }
            if let Some(media) = connection.media {
                failures.extend(guarded(TeardownStep::Media, media.stop()).await);
            }
            if let Some(peer) = connection.peer {
                failures.extend(guarded(TeardownStep::PeerConnection, peer.close()).await);
            }
        }

        for failure in &failures {
            warn!(step = failure.step.as_str(), cause = %failure.cause, "teardown step failed");
            self.log.warn(&failure.to_string());
        }
        if self.reconciler.finalize_open_turns(&self.log) {
            self.publish_transcript();
        }
        failures
    }

    async fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let current = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.generation == generation);
        if !current {
            debug!(generation, ?event, "dropping event from released connection");
            return;
        }

        match event {
            TransportEvent::SideChannelOpen => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.side_channel_open = true;
                }
                self.log.info("DataChannel open");
                self.configure_session().await;
            }
            TransportEvent::SideChannelMessage(bytes) => {
                if self.reconciler.ingest(&bytes, &self.log).changed() {
                    self.publish_transcript();
                }
            }
            TransportEvent::SideChannelClosed => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.side_channel_open = false;
                }
                self.log.info("DataChannel closed");
            }
            TransportEvent::SideChannelError(cause) => {
                self.log.warn(&format!("DataChannel error: {cause}"));
            }
            TransportEvent::RemoteTrack { kind } => {
                self.log.info(&format!("remote track: {kind}"));
            }
            TransportEvent::PeerStateChanged(peer_state) => {
                self.log.info(&format!("pc state: {peer_state}"));
                if peer_state == PeerState::Failed && self.state == ConnectionState::Connected {
                    let err = TransportError::PeerConnection("peer connection failed".into());
                    self.log.error(&err.to_string());
                    self.fail().await;
                }
            }
        }
    }

    async fn configure_session(&mut self) {
        let update = ClientMessage::SessionUpdate {
            transcription_model: self.settings.transcription_model.clone(),
        };
        if let Err(err) = self.send_message(update).await {
            self.log.warn(&format!("session.update failed: {err}"));
        }

        let greeting = ClientMessage::response(Some(self.settings.greeting_instructions.clone()));
        if let Err(err) = self.send_message(greeting).await {
            self.log.warn(&format!("response.create failed: {err}"));
        }
    }

    /// Returns whether the text was accepted. Accepted text is echoed into
    /// the transcript before anything is sent.
    async fn send_text(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || !self.side_channel_open() {
            return false;
        }

        if self.reconciler.record_local_text(text) {
            self.publish_transcript();
        }

        let item = ClientMessage::ConversationItemCreate {
            text: text.to_string(),
        };
        if let Err(err) = self.send_message(item).await {
            self.log.warn(&format!("conversation.item.create failed: {err}"));
            return true;
        }

        if let Err(err) = self.send_message(ClientMessage::response(None)).await {
            self.log.warn(&format!("response.create failed: {err}"));
        }
        true
    }

    async fn send_message(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let channel = self
            .connection
            .as_ref()
            .and_then(|connection| connection.side_channel.clone())
            .ok_or_else(|| TransportError::SideChannel("side-channel is not open".into()))?;

        let kind = message.kind();
        let envelope = message.into_envelope();
        if let Some(id) = envelope.id.as_deref() {
            self.reconciler.remember_sent(id);
        }
        channel.send_text(envelope.to_value().to_string()).await?;
        self.log.info(&format!("sent {kind}"));
        Ok(())
    }

    fn side_channel_open(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.side_channel_open)
    }

    fn set_state(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "rejected connection state transition");
            return;
        }
        debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
        self.state_tx.send_replace(next);
        let _ = self.events.send(ClientEvent::StateChanged(next));
    }

    fn publish_transcript(&self) {
        let snapshot = self.reconciler.transcript().snapshot();
        self.transcript_tx.send_replace(snapshot.clone());
        let _ = self.events.send(ClientEvent::TranscriptChanged(snapshot));
    }
}

fn spawn_event_forwarder(
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    inbox: mpsc::WeakUnboundedSender<ControllerInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inbox) = inbox.upgrade() else {
                break;
            };
            if inbox
                .send(ControllerInput::Transport { generation, event })
                .is_err()
            {
                break;
            }
        }
    })
}

async fn guarded<F>(step: TeardownStep, release: F) -> Option<TeardownFailure>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match AssertUnwindSafe(release).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(TeardownFailure {
            step,
            cause: err.to_string(),
        }),
        Err(panic) => Some(TeardownFailure {
            step,
            cause: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
