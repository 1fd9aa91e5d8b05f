use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::{Envelope, WireFormat};

pub mod tags {
    pub const SESSION_UPDATE: &str = "session.update";
    pub const RESPONSE_CREATE: &str = "response.create";
    pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";

    pub const INPUT_TRANSCRIPTION_COMPLETED: &str =
        "conversation.item.input_audio_transcription.completed";
    pub const AUDIO_TRANSCRIPT_DELTA: &str = "response.audio_transcript.delta";
    pub const AUDIO_TRANSCRIPT_DONE: &str = "response.audio_transcript.done";
    pub const TEXT_DELTA: &str = "response.text.delta";
    pub const TEXT_DONE: &str = "response.text.done";
    pub const ERROR: &str = "error";

    pub const USER_TEXT: &str = "user_text";
    pub const ASSISTANT_MARKDOWN: &str = "assistant_markdown";
}

pub const DEFAULT_MODALITIES: [&str; 2] = ["audio", "text"];

/// Messages this client sends over the side-channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    SessionUpdate {
        transcription_model: String,
    },
    ResponseCreate {
        modalities: Vec<String>,
        instructions: Option<String>,
    },
    ConversationItemCreate {
        text: String,
    },
}

impl ClientMessage {
    pub fn response(instructions: Option<String>) -> Self {
        ClientMessage::ResponseCreate {
            modalities: DEFAULT_MODALITIES.iter().map(|m| m.to_string()).collect(),
            instructions,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SessionUpdate { .. } => tags::SESSION_UPDATE,
            ClientMessage::ResponseCreate { .. } => tags::RESPONSE_CREATE,
            ClientMessage::ConversationItemCreate { .. } => tags::CONVERSATION_ITEM_CREATE,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ClientMessage::SessionUpdate {
                transcription_model,
            } => json!({
                "session": {
                    "input_audio_transcription": { "model": transcription_model },
                },
            }),
            ClientMessage::ResponseCreate {
                modalities,
                instructions,
            } => {
                let mut response = json!({ "modalities": modalities });
                if let Some(instructions) = instructions {
                    response["instructions"] = Value::String(instructions.clone());
                }
                json!({ "response": response })
            }
            ClientMessage::ConversationItemCreate { text } => json!({
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }],
                },
            }),
        }
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope::new(self.kind(), self.payload(), WireFormat::Realtime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Upstream issuers return the secret either bare or wrapped as `{value}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretField {
    Plain(String),
    Wrapped { value: String },
}

impl SecretField {
    pub fn into_inner(self) -> String {
        match self {
            SecretField::Plain(value) | SecretField::Wrapped { value } => value,
        }
    }
}

/// Body returned by the session-issuing backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionGrantBody {
    #[serde(default)]
    pub client_secret: Option<SecretField>,
    /// Room-service backends hand out a join token instead of a client secret.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
}

impl SessionGrantBody {
    pub fn credential(&self) -> Option<String> {
        self.client_secret
            .clone()
            .map(SecretField::into_inner)
            .or_else(|| self.token.clone())
            .filter(|secret| !secret.trim().is_empty())
    }
}
