//! End-to-end behavior of the inbound decoding pipeline
//!
//! Feeds deliveries shaped like every producer we know of (relaychat itself,
//! alias-keyed documents, plain-text lines, header-only typing pings, LLM
//! artifacts, garbage bytes) through `MessageDecoder` and checks the resulting
//! events.

use bytes::Bytes;
use proptest::prelude::*;
use relaychat::processing::{
    clean, extract_field, split_plain_text, DecodeOutcome, DropReason, MessageDecoder,
};
use relaychat::protocol::{
    typing_headers, ChatEnvelope, DecodedEvent, InboundDelivery, TypingEnvelope,
    PLAIN_TEXT_SENDER, REMOTE_SENDER, SENDER_FIELDS,
};
use serde_json::{json, Map, Value};

fn body(text: &str) -> InboundDelivery {
    InboundDelivery::new(Bytes::from(text.to_string()))
}

fn published(sender: &str, text: &str) -> InboundDelivery {
    let document = serde_json::to_vec(&ChatEnvelope::new(sender, text)).unwrap();
    InboundDelivery::new(document)
}

#[test]
fn test_own_message_round_trips_to_another_identity() {
    let bob = MessageDecoder::new("Bob");
    let event = bob.decode(&published("Alice", "see you at 5: bring the map"));
    assert_eq!(
        event,
        Some(DecodedEvent::message("Alice", "see you at 5: bring the map"))
    );
}

#[test]
fn test_own_message_is_never_echoed() {
    let alice = MessageDecoder::new("Alice");
    assert_eq!(
        alice.classify(&published("ALICE", "hello")),
        DecodeOutcome::Dropped(DropReason::SelfEcho)
    );
}

#[test]
fn test_typing_document_and_headers_agree() {
    let alice = MessageDecoder::new("Alice");

    let document = serde_json::to_vec(&TypingEnvelope::new("Bob", true)).unwrap();
    let from_body = alice.decode(&InboundDelivery::new(document));

    let from_headers = typing_headers("Bob", true)
        .into_iter()
        .fold(InboundDelivery::new(Bytes::new()), |delivery, (k, v)| {
            delivery.with_header(k, v.into_bytes())
        });
    let from_headers = alice.decode(&from_headers);

    assert_eq!(from_body, Some(DecodedEvent::typing("Bob", true)));
    assert_eq!(from_body, from_headers);
}

#[test]
fn test_header_typing_from_self_is_suppressed() {
    let alice = MessageDecoder::new("Alice");
    let delivery = InboundDelivery::new(Bytes::new())
        .with_header("x-msg-type", "typing")
        .with_header("x-sender", "alice")
        .with_header("x-is-typing", "true");
    assert_eq!(alice.decode(&delivery), None);
}

#[test]
fn test_typing_document_without_flag_becomes_message() {
    let alice = MessageDecoder::new("Alice");
    let event = alice.decode(&body(r#"{"type":"typing","sender":"Bob","text":"odd"}"#));
    assert_eq!(event, Some(DecodedEvent::message("Bob", "odd")));
}

#[test]
fn test_foreign_producers() {
    let alice = MessageDecoder::new("Alice");

    let cases = [
        (r#"{"user":"Bob","text":"hello"}"#, "Bob", "hello"),
        (r#"{"Username":"Carol","Msg":"hey"}"#, "Carol", "hey"),
        (r#"{"author":42,"body":true}"#, "42", "true"),
        (r#"{"text":"no name given"}"#, REMOTE_SENDER, "no name given"),
        ("Dave: plain and simple", "Dave", "plain and simple"),
        ("just some words", PLAIN_TEXT_SENDER, "just some words"),
        (r#"{not valid"#, PLAIN_TEXT_SENDER, "{not valid"),
        (r#"["an","array"]"#, REMOTE_SENDER, r#"["an","array"]"#),
        ("17", REMOTE_SENDER, "17"),
    ];

    for (raw, sender, content) in cases {
        assert_eq!(
            alice.decode(&body(raw)),
            Some(DecodedEvent::message(sender, content)),
            "decoding {raw}"
        );
    }
}

#[test]
fn test_llm_artifacts_are_cleaned_on_the_way_in() {
    let alice = MessageDecoder::new("Alice");

    let tool_call = json!({"sender": "Bot", "message": "[TOOL_CALLS]{\"content\":\"hola\"}"});
    assert_eq!(
        alice.decode(&body(&tool_call.to_string())),
        Some(DecodedEvent::message("Bot", "hola"))
    );

    assert_eq!(
        alice.decode(&body(r"Bot: caf\u00e9 time")),
        Some(DecodedEvent::message("Bot", "café time"))
    );
}

#[test]
fn test_blank_and_empty_deliveries() {
    let alice = MessageDecoder::new("Alice");

    for raw in ["", "   ", "\n\t"] {
        assert_eq!(
            alice.classify(&body(raw)),
            DecodeOutcome::Dropped(DropReason::Blank)
        );
    }

    assert_eq!(
        alice.classify(&body(r#"{"sender":"Bob","message":"   "}"#)),
        DecodeOutcome::Dropped(DropReason::EmptyContent)
    );
}

#[test]
fn test_invalid_utf8_is_recovered_as_remote() {
    let alice = MessageDecoder::new("Alice");
    let delivery = InboundDelivery::new(vec![b'h', b'i', 0xFF, b'!']);

    match alice.classify(&delivery) {
        DecodeOutcome::Recovered(DecodedEvent::Message(message)) => {
            assert_eq!(message.sender, REMOTE_SENDER);
            assert!(message.content.starts_with("hi"));
            assert!(message.content.ends_with('!'));
        }
        other => panic!("Expected a recovered message, got {other:?}"),
    }
}

#[test]
fn test_late_delimiter_is_not_a_sender() {
    let line = "this sentence carries on for a while: then a colon";
    assert_eq!(
        split_plain_text(line),
        (PLAIN_TEXT_SENDER.to_string(), line.to_string())
    );
}

fn alias_strategy() -> impl Strategy<Value = usize> {
    0..SENDER_FIELDS.len()
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9]{0,11}"
}

proptest! {
    #[test]
    fn prop_earliest_sender_alias_wins(
        picks in prop::collection::btree_set(alias_strategy(), 1..4),
        names in prop::collection::vec(name_strategy(), 4),
        uppercase in any::<bool>(),
    ) {
        let mut object = Map::new();
        for (slot, index) in picks.iter().enumerate() {
            let key = if uppercase {
                SENDER_FIELDS[*index].to_uppercase()
            } else {
                SENDER_FIELDS[*index].to_string()
            };
            object.insert(key, Value::from(names[slot].clone()));
        }
        let record = Value::Object(object);

        // btree_set iterates in ascending index order, so slot 0 is the earliest alias
        prop_assert_eq!(extract_field(&record, SENDER_FIELDS), Some(names[0].clone()));
    }

    #[test]
    fn prop_self_is_never_emitted(
        identity in name_strategy(),
        text in "[a-z ]{1,40}",
        shape in 0..4u8,
    ) {
        let decoder = MessageDecoder::new(identity.clone());
        let sender = identity.to_uppercase();
        let delivery = match shape {
            0 => body(&json!({"sender": sender, "message": text}).to_string()),
            1 => body(&json!({"from": sender, "type": "typing", "isTyping": true}).to_string()),
            2 => body(&format!("{sender}: {text}")),
            _ => InboundDelivery::new(Bytes::new())
                .with_header("x-msg-type", "typing")
                .with_header("x-sender", sender.as_str())
                .with_header("x-is-typing", "false"),
        };

        prop_assert_eq!(decoder.decode(&delivery), None);
    }

    #[test]
    fn prop_clean_is_idempotent_on_plain_text(text in "[A-Za-z0-9 ,.!?']{0,80}") {
        let once = clean(&text);
        prop_assert_eq!(clean(&once), once.clone());
        prop_assert_eq!(once, text.trim());
    }

    #[test]
    fn prop_decoder_is_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let decoder = MessageDecoder::new("Alice");
        let _ = decoder.classify(&InboundDelivery::new(bytes));
    }

    #[test]
    fn prop_round_trip_through_envelope(
        sender in name_strategy(),
        text in "[A-Za-z0-9][A-Za-z0-9 ,.!?:']{0,60}",
    ) {
        prop_assume!(sender.to_lowercase() != "observer");
        let decoder = MessageDecoder::new("Observer");
        let expected = DecodedEvent::message(sender.clone(), text.trim());
        prop_assert_eq!(decoder.decode(&published(&sender, &text)), Some(expected));
    }
}
