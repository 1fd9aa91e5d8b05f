use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::{SessionGrantBody, SessionRequest};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::error::NegotiationError;

pub const DEFAULT_MODEL: &str = "gpt-realtime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub room: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            room: None,
        }
    }

    pub fn with_room(mut self, room: Option<String>) -> Self {
        self.room = room;
        self
    }
}

/// Ephemeral secret that authorizes the peer-connection handshake.
pub struct TransportCredential(String);

impl TransportCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Clone for TransportCredential {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for TransportCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportCredential(<redacted>)")
    }
}

impl Drop for TransportCredential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfo {
    pub model: String,
    pub voice: Option<String>,
    pub room: Option<String>,
    pub identity: Option<String>,
}

impl Default for RoutingInfo {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            room: None,
            identity: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub credential: TransportCredential,
    pub routing: RoutingInfo,
}

impl NegotiatedSession {
    pub fn from_grant(
        grant: SessionGrantBody,
        default_model: &str,
    ) -> Result<Self, NegotiationError> {
        let credential = grant
            .credential()
            .map(TransportCredential::new)
            .ok_or(NegotiationError::MissingCredential)?;
        Ok(Self {
            credential,
            routing: RoutingInfo {
                model: grant
                    .model
                    .filter(|model| !model.trim().is_empty())
                    .unwrap_or_else(|| default_model.to_string()),
                voice: grant.voice,
                room: grant.room,
                identity: grant.identity,
            },
        })
    }
}

#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    async fn negotiate(
        &self,
        identity: &UserIdentity,
    ) -> Result<NegotiatedSession, NegotiationError>;
}

/// Obtains a session grant from the configured HTTP backend. A single attempt
/// is made; failures surface to the caller unchanged.
pub struct HttpSessionNegotiator {
    http: Client,
    session_url: String,
    default_model: String,
}

impl HttpSessionNegotiator {
    pub fn new(session_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), session_url)
    }

    pub fn with_client(http: Client, session_url: impl Into<String>) -> Self {
        Self {
            http,
            session_url: session_url.into(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

#[async_trait]
impl SessionNegotiator for HttpSessionNegotiator {
    async fn negotiate(
        &self,
        identity: &UserIdentity,
    ) -> Result<NegotiatedSession, NegotiationError> {
        debug!(url = %self.session_url, user_id = %identity.user_id, "requesting realtime session");
        let response = self
            .http
            .post(&self.session_url)
            .json(&SessionRequest {
                user_id: identity.user_id.clone(),
                room: identity.room.clone(),
            })
            .send()
            .await
            .map_err(|err| NegotiationError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| NegotiationError::Request(err.to_string()))?;
        if !status.is_success() {
            return Err(NegotiationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let grant: SessionGrantBody =
            serde_json::from_str(&body).map_err(|err| NegotiationError::Malformed {
                reason: err.to_string(),
                body: body.clone(),
            })?;
        let session = NegotiatedSession::from_grant(grant, &self.default_model)?;
        info!(model = %session.routing.model, "realtime session granted");
        Ok(session)
    }
}

#[cfg(test)]
#[path = "tests/negotiator_tests.rs"]
mod tests;
