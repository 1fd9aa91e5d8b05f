use shared::{domain::ConnectionState, error::ApiError};
use thiserror::Error;

pub use shared::envelope::DecodeFailure;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to reach session backend: {0}")]
    Request(String),
    #[error("session error ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed session response: {reason}")]
    Malformed { reason: String, body: String },
    #[error("session response did not include a transport credential")]
    MissingCredential,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("local media unavailable: {0}")]
    Media(String),
    #[error("peer connection failure: {0}")]
    PeerConnection(String),
    #[error("side-channel failure: {0}")]
    SideChannel(String),
    #[error("signaling rejected offer ({status}): {body}")]
    Signaling { status: u16, body: String },
    #[error("signaling request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    SideChannel,
    Media,
    PeerConnection,
}

impl TeardownStep {
    pub fn as_str(self) -> &'static str {
        match self {
            TeardownStep::SideChannel => "side-channel",
            TeardownStep::Media => "media tracks",
            TeardownStep::PeerConnection => "peer connection",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("failed to release {}: {cause}", step.as_str())]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("cannot start while {0}")]
    InvalidState(ConnectionState),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StartError {
    /// Parsed error body when a backend answered with a non-success status.
    pub fn backend_error(&self) -> Option<ApiError> {
        match self {
            StartError::Negotiation(NegotiationError::Rejected { status, body })
            | StartError::Transport(TransportError::Signaling { status, body }) => {
                Some(ApiError::from_response(*status, body))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session controller has shut down")]
    Closed,
    #[error(transparent)]
    Start(#[from] StartError),
}
