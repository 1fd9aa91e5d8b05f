//! Side-channel codec. Application envelopes `{v, id, ts, type, payload}` and
//! native realtime events `{type, event_id, ..}` both decode into [`Envelope`].

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// `{v, id, ts, type, payload}`
    #[default]
    Application,
    /// `{type, event_id, ...fields}`
    Realtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: Option<u32>,
    pub id: Option<String>,
    pub ts: Option<i64>,
    pub kind: String,
    pub payload: Value,
    pub format: WireFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("payload is not valid JSON: {reason}")]
    NotJson { raw: String, reason: String },
    #[error("payload is not a JSON object")]
    NotAnObject { raw: String },
    #[error("payload has no string `type` field")]
    MissingType { raw: String },
}

impl DecodeFailure {
    pub fn raw(&self) -> &str {
        match self {
            DecodeFailure::NotJson { raw, .. }
            | DecodeFailure::NotAnObject { raw }
            | DecodeFailure::MissingType { raw } => raw,
        }
    }
}

impl Envelope {
    /// Builds a freshly stamped envelope: new UUIDv4 id, current Unix
    /// millisecond timestamp and the fixed version tag.
    pub fn new(kind: impl Into<String>, payload: Value, format: WireFormat) -> Self {
        Self {
            version: Some(ENVELOPE_VERSION),
            id: Some(Uuid::new_v4().to_string()),
            ts: Some(Utc::now().timestamp_millis()),
            kind: kind.into(),
            payload,
            format,
        }
    }

    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        match self.format {
            WireFormat::Application => {
                let mut object = Map::new();
                object.insert(
                    "v".into(),
                    Value::from(self.version.unwrap_or(ENVELOPE_VERSION)),
                );
                if let Some(id) = &self.id {
                    object.insert("id".into(), Value::String(id.clone()));
                }
                if let Some(ts) = self.ts {
                    object.insert("ts".into(), Value::from(ts));
                }
                object.insert("type".into(), Value::String(self.kind.clone()));
                object.insert("payload".into(), self.payload.clone());
                Value::Object(object)
            }
            WireFormat::Realtime => {
                let mut object = match &self.payload {
                    Value::Object(fields) => fields.clone(),
                    Value::Null => Map::new(),
                    other => {
                        let mut fields = Map::new();
                        fields.insert("payload".into(), other.clone());
                        fields
                    }
                };
                object.insert("type".into(), Value::String(self.kind.clone()));
                if let Some(id) = &self.id {
                    object.insert("event_id".into(), Value::String(id.clone()));
                }
                Value::Object(object)
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }
}

pub fn encode(kind: &str, payload: Value, format: WireFormat) -> (Envelope, Vec<u8>) {
    let envelope = Envelope::new(kind, payload, format);
    let bytes = envelope.to_bytes();
    (envelope, bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeFailure> {
    let raw = || String::from_utf8_lossy(bytes).into_owned();

    let value: Value = serde_json::from_slice(bytes).map_err(|err| DecodeFailure::NotJson {
        raw: raw(),
        reason: err.to_string(),
    })?;
    let Value::Object(mut object) = value else {
        return Err(DecodeFailure::NotAnObject { raw: raw() });
    };
    let kind = match object.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => return Err(DecodeFailure::MissingType { raw: raw() }),
    };

    if object.contains_key("payload") && object.contains_key("v") {
        let version = object
            .get("v")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        let id = object.get("id").and_then(id_from_value);
        let ts = object.get("ts").and_then(Value::as_i64);
        let payload = object.remove("payload").unwrap_or(Value::Null);
        return Ok(Envelope {
            version,
            id,
            ts,
            kind,
            payload,
            format: WireFormat::Application,
        });
    }

    let id = object.remove("event_id").as_ref().and_then(id_from_value);
    Ok(Envelope {
        version: None,
        id,
        ts: None,
        kind,
        payload: Value::Object(object),
        format: WireFormat::Realtime,
    })
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/envelope_tests.rs"]
mod tests;
