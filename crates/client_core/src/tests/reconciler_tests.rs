use super::*;
use crate::log_sink::MemoryLogSink;
use serde_json::json;
use shared::domain::TranscriptEntry;

fn realtime(kind: &str, event_id: &str, fields: serde_json::Value) -> Vec<u8> {
    let mut object = fields;
    object["type"] = json!(kind);
    object["event_id"] = json!(event_id);
    object.to_string().into_bytes()
}

fn delta(event_id: &str, item_id: &str, text: &str) -> Vec<u8> {
    realtime(
        tags::AUDIO_TRANSCRIPT_DELTA,
        event_id,
        json!({ "item_id": item_id, "delta": text }),
    )
}

fn done(event_id: &str, item_id: &str) -> Vec<u8> {
    realtime(
        tags::AUDIO_TRANSCRIPT_DONE,
        event_id,
        json!({ "item_id": item_id }),
    )
}

fn user_text(id: &str, text: &str) -> Vec<u8> {
    json!({
        "v": 1,
        "id": id,
        "ts": 1_700_000_000_000i64,
        "type": "user_text",
        "payload": { "text": text },
    })
    .to_string()
    .into_bytes()
}

#[test]
fn deltas_then_done_yield_one_closed_entry() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    for (n, fragment) in ["Hel", "lo", " there"].iter().enumerate() {
        let outcome = reconciler.ingest(&delta(&format!("evt_{n}"), "item_1", fragment), &log);
        assert!(outcome.changed());
    }
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::open(Role::Assistant, "Hello there")]
    );

    assert!(reconciler.ingest(&done("evt_done", "item_1"), &log).changed());
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::Assistant, "Hello there")]
    );
    assert!(!reconciler.cursor(Role::Assistant).is_open());
}

#[test]
fn blank_speech_transcript_adds_nothing_and_clears_user_cursor() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    reconciler.apply(
        Role::User,
        TurnEvent::Delta {
            text: "um".into(),
            item_id: None,
        },
        &log,
    );
    assert!(reconciler.cursor(Role::User).is_open());

    let bytes = realtime(
        tags::INPUT_TRANSCRIPTION_COMPLETED,
        "evt_1",
        json!({ "item_id": "item_u", "transcript": "   " }),
    );
    reconciler.ingest(&bytes, &log);

    assert!(!reconciler.cursor(Role::User).is_open());
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::User, "um")]
    );

    let bytes = realtime(
        tags::INPUT_TRANSCRIPTION_COMPLETED,
        "evt_2",
        json!({ "transcript": "" }),
    );
    assert_eq!(reconciler.ingest(&bytes, &log), Ingest::Applied { changed: false });
    assert_eq!(reconciler.transcript().len(), 1);
}

#[test]
fn speech_transcript_is_trimmed() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    let bytes = realtime(
        tags::INPUT_TRANSCRIPTION_COMPLETED,
        "evt_1",
        json!({ "transcript": "  what's the weather?\n" }),
    );

    reconciler.ingest(&bytes, &log);

    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::User, "what's the weather?")]
    );
}

#[test]
fn interleaved_user_text_keeps_assistant_turn_open() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_a", "a"), &log);
    reconciler.ingest(&user_text("env_1", "hi"), &log);
    reconciler.ingest(&delta("evt_2", "item_a", "b"), &log);
    reconciler.ingest(&done("evt_3", "item_a"), &log);

    assert_eq!(
        reconciler.transcript().entries(),
        &[
            TranscriptEntry::closed(Role::Assistant, "ab"),
            TranscriptEntry::closed(Role::User, "hi"),
        ]
    );
}

#[test]
fn non_json_is_logged_and_ignored() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    reconciler.ingest(&delta("evt_1", "item_a", "partial"), &log);
    let before = reconciler.transcript().clone();

    let outcome = reconciler.ingest(b"ping?", &log);

    assert_eq!(outcome, Ingest::Malformed);
    assert_eq!(reconciler.transcript(), &before);
    assert!(log.contains("event(non-json): ping?"));
}

#[test]
fn duplicate_event_ids_are_dropped() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    let bytes = delta("evt_1", "item_a", "once");

    reconciler.ingest(&bytes, &log);
    assert_eq!(reconciler.ingest(&bytes, &log), Ingest::Duplicate);

    assert_eq!(reconciler.transcript().entries()[0].text, "once");
}

#[test]
fn echo_of_sent_envelope_is_not_reapplied() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.record_local_text("hello");
    reconciler.remember_sent("env_local");
    assert_eq!(
        reconciler.ingest(&user_text("env_local", "hello"), &log),
        Ingest::Duplicate
    );
    assert_eq!(reconciler.transcript().len(), 1);
}

#[test]
fn late_delta_for_finished_item_is_ignored() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_a", "Done."), &log);
    reconciler.ingest(&done("evt_2", "item_a"), &log);
    let outcome = reconciler.ingest(&delta("evt_3", "item_a", " extra"), &log);

    assert_eq!(outcome, Ingest::Applied { changed: false });
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::Assistant, "Done.")]
    );
}

#[test]
fn done_before_deltas_prevents_a_dangling_entry() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    assert!(!reconciler.ingest(&done("evt_1", "item_a"), &log).changed());
    reconciler.ingest(&delta("evt_2", "item_a", "late"), &log);

    assert!(reconciler.transcript().is_empty());
}

#[test]
fn late_done_for_finished_item_leaves_next_turn_streaming() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_a", "Hi"), &log);
    reconciler.ingest(&done("evt_2", "item_a"), &log);
    reconciler.ingest(&delta("evt_3", "item_b", "Sec"), &log);
    let outcome = reconciler.ingest(&done("evt_4", "item_a"), &log);
    assert_eq!(outcome, Ingest::Applied { changed: false });
    assert!(reconciler.ingest(&delta("evt_5", "item_b", "ond"), &log).changed());

    assert_eq!(
        reconciler.transcript().entries(),
        &[
            TranscriptEntry::closed(Role::Assistant, "Hi"),
            TranscriptEntry::open(Role::Assistant, "Second"),
        ]
    );
}

#[test]
fn done_for_other_item_records_it_without_closing_open_turn() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_b", "still going"), &log);
    assert!(!reconciler.ingest(&done("evt_2", "item_c"), &log).changed());
    assert!(reconciler.cursor(Role::Assistant).is_open());

    reconciler.ingest(&delta("evt_3", "item_c", "too late"), &log);
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::open(Role::Assistant, "still going")]
    );
}

#[test]
fn delta_after_rejected_cursor_starts_fresh_entry_with_item() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_a", "one"), &log);
    // Close the entry behind the cursor's back so the next delta sees a stale cursor.
    let index = reconciler.cursor(Role::Assistant).open_index.expect("open");
    reconciler.transcript.close(index).expect("close");
    reconciler.assistant.item_id = None;

    assert!(reconciler.ingest(&delta("evt_2", "item_b", "two"), &log).changed());
    assert_eq!(
        reconciler.transcript().entries(),
        &[
            TranscriptEntry::closed(Role::Assistant, "one"),
            TranscriptEntry::open(Role::Assistant, "two"),
        ]
    );
    assert_eq!(
        reconciler.cursor(Role::Assistant).item_id.as_deref(),
        Some("item_b")
    );
    assert!(log.contains("dropping stale assistant cursor"));
}

#[test]
fn inbound_user_text_is_trimmed() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&user_text("env_1", "  typed elsewhere \n"), &log);
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::User, "typed elsewhere")]
    );
}

#[test]
fn delta_for_new_item_finalizes_previous_turn() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(&delta("evt_1", "item_a", "first"), &log);
    reconciler.ingest(&delta("evt_2", "item_b", "second"), &log);

    assert_eq!(
        reconciler.transcript().entries(),
        &[
            TranscriptEntry::closed(Role::Assistant, "first"),
            TranscriptEntry::open(Role::Assistant, "second"),
        ]
    );
    assert_eq!(
        reconciler.cursor(Role::Assistant).item_id.as_deref(),
        Some("item_b")
    );
    assert!(log.contains("finalizing it first"));
}

#[test]
fn final_for_open_role_closes_partial_first() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    reconciler.ingest(&delta("evt_1", "item_a", "partial"), &log);

    let markdown = json!({
        "v": 1,
        "id": "env_md",
        "ts": 0,
        "type": "assistant_markdown",
        "payload": { "markdown": "**full** answer" },
    })
    .to_string();
    reconciler.ingest(markdown.as_bytes(), &log);

    assert_eq!(
        reconciler.transcript().entries(),
        &[
            TranscriptEntry::closed(Role::Assistant, "partial"),
            TranscriptEntry::closed(Role::Assistant, "**full** answer"),
        ]
    );
}

#[test]
fn empty_delta_and_idle_done_are_no_ops() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    assert!(!reconciler.apply(
        Role::Assistant,
        TurnEvent::Delta {
            text: String::new(),
            item_id: None,
        },
        &log,
    ));
    assert!(!reconciler.apply(Role::Assistant, TurnEvent::Done { item_id: None }, &log));
    assert!(reconciler.transcript().is_empty());
}

#[test]
fn local_text_is_trimmed_and_blank_is_skipped() {
    let mut reconciler = Reconciler::new();

    assert!(!reconciler.record_local_text("   "));
    assert!(reconciler.record_local_text("  hi "));
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::User, "hi")]
    );
}

#[test]
fn finalize_open_turns_keeps_accumulated_text() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();
    reconciler.ingest(&delta("evt_1", "item_a", "cut off mid"), &log);

    assert!(reconciler.finalize_open_turns(&log));
    assert!(!reconciler.finalize_open_turns(&log));
    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::Assistant, "cut off mid")]
    );
}

#[test]
fn text_only_responses_stream_like_audio_transcripts() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    reconciler.ingest(
        &realtime(tags::TEXT_DELTA, "evt_1", json!({ "item_id": "i", "delta": "ok" })),
        &log,
    );
    reconciler.ingest(
        &realtime(tags::TEXT_DONE, "evt_2", json!({ "item_id": "i", "text": "ok" })),
        &log,
    );

    assert_eq!(
        reconciler.transcript().entries(),
        &[TranscriptEntry::closed(Role::Assistant, "ok")]
    );
}

#[test]
fn remote_errors_and_unknown_events_leave_transcript_alone() {
    let log = MemoryLogSink::new();
    let mut reconciler = Reconciler::new();

    let error = realtime(
        tags::ERROR,
        "evt_1",
        json!({ "error": { "type": "invalid_request_error", "message": "bad session" } }),
    );
    assert_eq!(reconciler.ingest(&error, &log), Ingest::Ignored);
    let unknown = realtime("rate_limits.updated", "evt_2", json!({ "rate_limits": [] }));
    assert_eq!(reconciler.ingest(&unknown, &log), Ingest::Ignored);

    assert!(reconciler.transcript().is_empty());
    assert!(log.contains("realtime error: bad session"));
    assert!(log.contains("event: rate_limits.updated"));
}

#[test]
fn classify_treats_mistyped_fields_as_absent() {
    let envelope = shared::envelope::decode(
        json!({ "type": tags::AUDIO_TRANSCRIPT_DELTA, "delta": 5, "item_id": null })
            .to_string()
            .as_bytes(),
    )
    .expect("decode");

    assert_eq!(
        classify(&envelope),
        InboundEvent::AssistantDelta {
            text: String::new(),
            item_id: None,
        }
    );
}

#[test]
fn seen_ids_forget_oldest_past_capacity() {
    let mut ids = RecentIds::new(2);
    assert!(ids.insert("a"));
    assert!(ids.insert("b"));
    assert!(!ids.insert("a"));
    assert!(ids.insert("c"));

    assert!(!ids.contains("a"));
    assert!(ids.contains("b"));
    assert!(ids.contains("c"));
}
