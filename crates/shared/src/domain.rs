use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used by transcript renderers.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the conversation transcript.
///
/// `open` entries are still receiving deltas for the current turn. Once an
/// entry is closed its text never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub open: bool,
}

impl TranscriptEntry {
    pub fn open(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            open: true,
        }
    }

    pub fn closed(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            open: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Starting,
    Connected,
    Stopping,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Error => "error",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Connected)
                | (Starting, Error)
                | (Connected, Stopping)
                | (Connected, Error)
                | (Error, Stopping)
                | (Stopping, Idle)
        )
    }

    /// `start()` is only accepted from idle.
    pub fn can_start(self) -> bool {
        self == ConnectionState::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
