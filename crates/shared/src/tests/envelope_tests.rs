use super::*;
use serde_json::json;

#[test]
fn decodes_application_envelope() {
    let bytes = br#"{"v":1,"id":"evt-1","ts":1700000000000,"type":"user_text","payload":{"text":"hello"}}"#;
    let envelope = decode(bytes).expect("decode");

    assert_eq!(envelope.format, WireFormat::Application);
    assert_eq!(envelope.version, Some(1));
    assert_eq!(envelope.id.as_deref(), Some("evt-1"));
    assert_eq!(envelope.ts, Some(1_700_000_000_000));
    assert_eq!(envelope.kind, "user_text");
    assert_eq!(envelope.payload_str("text"), Some("hello"));
}

#[test]
fn decodes_realtime_event_and_moves_event_id() {
    let bytes = br#"{"type":"response.audio_transcript.delta","event_id":"event_42","item_id":"item_1","delta":"Hel"}"#;
    let envelope = decode(bytes).expect("decode");

    assert_eq!(envelope.format, WireFormat::Realtime);
    assert_eq!(envelope.id.as_deref(), Some("event_42"));
    assert_eq!(envelope.kind, "response.audio_transcript.delta");
    assert_eq!(envelope.payload_str("delta"), Some("Hel"));
    assert_eq!(envelope.payload_str("item_id"), Some("item_1"));
    assert!(envelope.payload.get("type").is_none());
    assert!(envelope.payload.get("event_id").is_none());
}

#[test]
fn non_json_input_is_a_failure_with_raw_text() {
    let failure = decode(b"ping \xF0 not json").expect_err("must fail");
    assert!(matches!(failure, DecodeFailure::NotJson { .. }));
    assert!(failure.raw().starts_with("ping "));
}

#[test]
fn json_without_type_is_rejected() {
    assert!(matches!(
        decode(br#"{"payload":{}}"#),
        Err(DecodeFailure::MissingType { .. })
    ));
    assert!(matches!(
        decode(br#"{"type":7}"#),
        Err(DecodeFailure::MissingType { .. })
    ));
    assert!(matches!(
        decode(br#"["type"]"#),
        Err(DecodeFailure::NotAnObject { .. })
    ));
}

#[test]
fn encode_stamps_fresh_ids_and_version() {
    let (first, _) = encode("user_text", json!({"text": "a"}), WireFormat::Application);
    let (second, _) = encode("user_text", json!({"text": "a"}), WireFormat::Application);

    assert_eq!(first.version, Some(ENVELOPE_VERSION));
    assert!(first.ts.is_some());
    assert_ne!(first.id, second.id);
}

#[test]
fn realtime_encoding_flattens_payload_fields() {
    let (envelope, bytes) = encode(
        "response.create",
        json!({"response": {"modalities": ["audio", "text"]}}),
        WireFormat::Realtime,
    );
    let value: Value = serde_json::from_slice(&bytes).expect("json");

    assert_eq!(value["type"], "response.create");
    assert_eq!(value["event_id"], json!(envelope.id));
    assert_eq!(value["response"]["modalities"][1], "text");
    assert!(value.get("v").is_none());
    assert!(value.get("payload").is_none());
}

#[test]
fn unknown_types_survive_forwarding() {
    let bytes = br#"{"v":1,"id":"x-9","ts":5,"type":"tool.progress","payload":{"step":3}}"#;
    let envelope = decode(bytes).expect("decode");
    let forwarded = decode(&envelope.to_bytes()).expect("re-decode");

    assert_eq!(forwarded, envelope);
    assert_eq!(forwarded.kind, "tool.progress");
}
