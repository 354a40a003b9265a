// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::{Datelike, TimeZone, Timelike};
use yare::parameterized;

#[parameterized(
    user = { "user", Sender::User },
    bot = { "bot", Sender::Counterpart },
    assistant = { "assistant", Sender::Counterpart },
    system_upper = { "SYSTEM", Sender::System },
)]
fn test_sender_from_str(input: &str, expected: Sender) {
    assert_eq!(input.parse::<Sender>().unwrap(), expected);
}

#[test]
fn test_sender_from_str_rejects_unknown() {
    assert!("robot".parse::<Sender>().is_err());
}

#[test]
fn test_sender_wire_names() {
    assert_eq!(serde_json::to_string(&Sender::Counterpart).unwrap(), "\"bot\"");
    assert_eq!(Sender::User.to_string(), "user");
}

#[test]
fn test_message_id_variants_never_collide() {
    let pending = MessageId::Pending(PendingId::new(1));
    let confirmed = MessageId::Confirmed("pending-1".to_string());
    // Same display text, different identity.
    assert_eq!(pending.to_string(), confirmed.to_string());
    assert_ne!(pending, confirmed);
    assert!(pending.is_pending());
    assert_eq!(confirmed.confirmed(), Some("pending-1"));
    assert_eq!(pending.pending(), Some(PendingId::new(1)));
}

#[test]
fn test_wire_message_accepts_numeric_id_and_naive_timestamp() {
    let json = r#"{"id": 42, "sender": "bot", "content": "hi", "created_at": "2025-03-01T10:20:30.123456"}"#;
    let msg: WireMessage = serde_json::from_str(json).unwrap();
    assert_eq!(msg.id, "42");
    assert_eq!(msg.sender, Sender::Counterpart);
    let ts = msg.created_at.unwrap();
    assert_eq!(ts.year(), 2025);
    assert_eq!(ts.hour(), 10);
}

#[test]
fn test_wire_message_missing_timestamp_is_stamped() {
    let json = r#"{"id": "m1", "sender": "user", "content": "hello"}"#;
    let msg: WireMessage = serde_json::from_str(json).unwrap();
    assert!(msg.created_at.is_none());

    let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let message = msg.into_message(now);
    assert_eq!(message.id, MessageId::Confirmed("m1".to_string()));
    assert_eq!(message.created_at, now);
}

#[test]
fn test_wire_message_unparseable_timestamp_is_dropped() {
    let json = r#"{"id": "m1", "sender": "user", "content": "x", "created_at": "yesterday"}"#;
    let msg: WireMessage = serde_json::from_str(json).unwrap();
    assert!(msg.created_at.is_none());
}

#[parameterized(
    rfc3339_offset = { "2025-03-01T12:00:00+02:00", 10 },
    rfc3339_zulu = { "2025-03-01T12:00:00Z", 12 },
    naive = { "2025-03-01T12:00:00", 12 },
    naive_space = { "2025-03-01 12:00:00.5", 12 },
)]
fn test_parse_timestamp_forms(input: &str, utc_hour: u32) {
    assert_eq!(parse_timestamp(input).unwrap().hour(), utc_hour);
}
