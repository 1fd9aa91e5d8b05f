use std::collections::{HashSet, VecDeque};

use shared::{
    domain::Role,
    envelope::{decode, Envelope},
    protocol::tags,
};

use crate::{
    log_sink::LogSink,
    transcript::{Transcript, TurnCursor},
};

const SEEN_ID_CAPACITY: usize = 1024;
const FINISHED_ITEM_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    UserSpeechFinalized { text: String },
    AssistantDelta { text: String, item_id: Option<String> },
    AssistantDone { item_id: Option<String> },
    UserText { text: String },
    AssistantMessage { text: String },
    RemoteError { message: String },
    Unrecognized { kind: String },
}

/// Maps a decoded envelope onto the reconciler's vocabulary. Fields of the
/// wrong JSON type are treated as absent rather than as errors.
pub fn classify(envelope: &Envelope) -> InboundEvent {
    let text_field = |field: &str| envelope.payload_str(field).unwrap_or_default().to_string();
    let item_id = || envelope.payload_str("item_id").map(str::to_string);

    match envelope.kind.as_str() {
        tags::INPUT_TRANSCRIPTION_COMPLETED => InboundEvent::UserSpeechFinalized {
            text: text_field("transcript"),
        },
        tags::AUDIO_TRANSCRIPT_DELTA | tags::TEXT_DELTA => InboundEvent::AssistantDelta {
            text: text_field("delta"),
            item_id: item_id(),
        },
        tags::AUDIO_TRANSCRIPT_DONE | tags::TEXT_DONE => {
            InboundEvent::AssistantDone { item_id: item_id() }
        }
        tags::USER_TEXT => InboundEvent::UserText {
            text: text_field("text"),
        },
        tags::ASSISTANT_MARKDOWN => InboundEvent::AssistantMessage {
            text: text_field("markdown"),
        },
        tags::ERROR => InboundEvent::RemoteError {
            message: envelope
                .payload
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(|message| message.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| envelope.payload.to_string()),
        },
        other => InboundEvent::Unrecognized {
            kind: other.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta { text: String, item_id: Option<String> },
    Final { text: String },
    Done { item_id: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Applied { changed: bool },
    Duplicate,
    Ignored,
    Malformed,
}

impl Ingest {
    pub fn changed(self) -> bool {
        matches!(self, Ingest::Applied { changed: true })
    }
}

#[derive(Debug, Clone)]
struct RecentIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Returns false when `id` was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    transcript: Transcript,
    user: TurnCursor,
    assistant: TurnCursor,
    seen_ids: RecentIds,
    finished_items: RecentIds,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            transcript: Transcript::new(),
            user: TurnCursor::default(),
            assistant: TurnCursor::default(),
            seen_ids: RecentIds::new(SEEN_ID_CAPACITY),
            finished_items: RecentIds::new(FINISHED_ITEM_CAPACITY),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn cursor(&self, role: Role) -> &TurnCursor {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }

    pub fn ingest(&mut self, bytes: &[u8], log: &dyn LogSink) -> Ingest {
        match decode(bytes) {
            Ok(envelope) => self.ingest_envelope(&envelope, log),
            Err(failure) => {
                log.info(&format!("event(non-json): {}", failure.raw()));
                Ingest::Malformed
            }
        }
    }

    pub fn ingest_envelope(&mut self, envelope: &Envelope, log: &dyn LogSink) -> Ingest {
        if let Some(id) = envelope.id.as_deref() {
            if !self.seen_ids.insert(id) {
                log.debug(&format!("duplicate event ignored: {} id={id}", envelope.kind));
                return Ingest::Duplicate;
            }
        }

        let changed = match classify(envelope) {
            InboundEvent::UserSpeechFinalized { text } => self.apply(
                Role::User,
                TurnEvent::Final {
                    text: text.trim().to_string(),
                },
                log,
            ),
            InboundEvent::AssistantDelta { text, item_id } => {
                self.apply(Role::Assistant, TurnEvent::Delta { text, item_id }, log)
            }
            InboundEvent::AssistantDone { item_id } => {
                self.apply(Role::Assistant, TurnEvent::Done { item_id }, log)
            }
            InboundEvent::UserText { text } => self.apply(
                Role::User,
                TurnEvent::Final {
                    text: text.trim().to_string(),
                },
                log,
            ),
            InboundEvent::AssistantMessage { text } => {
                self.apply(Role::Assistant, TurnEvent::Final { text }, log)
            }
            InboundEvent::RemoteError { message } => {
                log.warn(&format!("realtime error: {message}"));
                return Ingest::Ignored;
            }
            InboundEvent::Unrecognized { kind } => {
                log.debug(&format!("event: {kind}"));
                return Ingest::Ignored;
            }
        };
        Ingest::Applied { changed }
    }

    /// Applies one turn event for `role`. Returns whether the transcript changed.
    pub fn apply(&mut self, role: Role, event: TurnEvent, log: &dyn LogSink) -> bool {
        match event {
            TurnEvent::Delta { text, item_id } => self.apply_delta(role, &text, item_id, log),
            TurnEvent::Final { text } => {
                let mut changed = false;
                if self.cursor(role).is_open() {
                    log.warn(&format!(
                        "{role} message arrived while a {role} turn was open; finalizing it first"
                    ));
                    changed = self.finalize(role, log);
                }
                if !text.trim().is_empty() {
                    self.transcript.append_closed(role, text);
                    changed = true;
                }
                changed
            }
            TurnEvent::Done { item_id } => {
                let Some(id) = item_id.as_deref() else {
                    return self.finalize(role, log);
                };
                if self.finished_items.contains(id) {
                    log.debug(&format!("late {role} done for finished item {id} ignored"));
                    return false;
                }
                let open_item = self.cursor(role).item_id.as_deref();
                if self.cursor(role).is_open() && open_item.is_some_and(|open| open != id) {
                    log.debug(&format!("{role} done for item {id} leaves the open turn alone"));
                    self.finished_items.insert(id);
                    return false;
                }
                self.finished_items.insert(id);
                self.finalize(role, log)
            }
        }
    }

    pub fn record_local_text(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.transcript.append_closed(Role::User, text);
        true
    }

    /// Ids of envelopes this client sent, so remote echoes are not re-applied.
    pub fn remember_sent(&mut self, id: &str) {
        self.seen_ids.insert(id);
    }

    pub fn finalize_open_turns(&mut self, log: &dyn LogSink) -> bool {
        let user = self.finalize(Role::User, log);
        let assistant = self.finalize(Role::Assistant, log);
        user || assistant
    }

    fn apply_delta(
        &mut self,
        role: Role,
        text: &str,
        item_id: Option<String>,
        log: &dyn LogSink,
    ) -> bool {
        if text.is_empty() {
            return false;
        }
        if let Some(id) = item_id.as_deref() {
            if self.finished_items.contains(id) {
                log.debug(&format!("late {role} delta for finished item {id} ignored"));
                return false;
            }
        }

        let switched_item = {
            let cursor = self.cursor(role);
            match (cursor.item_id.as_deref(), item_id.as_deref()) {
                (Some(open), Some(incoming)) => cursor.is_open() && open != incoming,
                _ => false,
            }
        };
        if switched_item {
            log.warn(&format!(
                "{role} delta for a new item while a turn was open; finalizing it first"
            ));
            self.finalize(role, log);
        }

        let (transcript, cursor) = self.parts(role);
        if let Some(index) = cursor.open_index {
            cursor.accumulated.push_str(text);
            if cursor.item_id.is_none() {
                cursor.item_id = item_id.clone();
            }
            match transcript.replace_open_text(index, &cursor.accumulated) {
                Ok(()) => return true,
                Err(err) => {
                    log.warn(&format!("dropping stale {role} cursor: {err}"));
                    cursor.clear();
                }
            }
        }

        let index = transcript.append_open(role, text);
        cursor.open_index = Some(index);
        cursor.accumulated = text.to_string();
        cursor.item_id = item_id;
        true
    }

    fn finalize(&mut self, role: Role, log: &dyn LogSink) -> bool {
        let Some(index) = self.cursor(role).open_index else {
            return false;
        };
        if let Some(id) = self.cursor(role).item_id.clone() {
            self.finished_items.insert(&id);
        }

        let (transcript, cursor) = self.parts(role);
        let closed = match transcript.close(index) {
            Ok(()) => true,
            Err(err) => {
                log.warn(&format!("could not close {role} entry: {err}"));
                false
            }
        };
        cursor.clear();
        closed
    }

    fn parts(&mut self, role: Role) -> (&mut Transcript, &mut TurnCursor) {
        let cursor = match role {
            Role::User => &mut self.user,
            Role::Assistant => &mut self.assistant,
        };
        (&mut self.transcript, cursor)
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
