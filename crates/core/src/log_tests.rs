// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::TimeZone;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn confirmed(id: &str, sender: Sender, content: &str) -> Message {
    Message::confirmed(id, sender, content, now())
}

fn ids(log: &MessageLog) -> Vec<String> {
    log.entries().iter().map(|m| m.id.to_string()).collect()
}

#[test]
fn test_optimistic_entry_is_visible_immediately() {
    let mut log = MessageLog::new();
    let id = log.append_optimistic("hi", now());

    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].id, MessageId::Pending(id));
    assert_eq!(log.entries()[0].sender, Sender::User);
    assert_eq!(log.pending_count(), 1);
}

#[test]
fn test_pending_ids_are_distinct() {
    let mut log = MessageLog::new();
    let a = log.append_optimistic("a", now());
    let b = log.append_optimistic("b", now());
    assert_ne!(a, b);
}

#[test]
fn test_reconcile_twice_is_idempotent() {
    let mut log = MessageLog::new();
    log.append_optimistic("hi", now());

    let first = log.reconcile(confirmed("m1", Sender::User, "hi"));
    let second = log.reconcile(confirmed("m1", Sender::User, "hi"));

    assert!(matches!(first, Reconciled::Replaced(_)));
    assert_eq!(second, Reconciled::Duplicate);
    assert_eq!(ids(&log), vec!["m1"]);
}

#[test]
fn test_reconcile_replaces_only_the_oldest_pending_entry() {
    let mut log = MessageLog::new();
    let oldest = log.append_optimistic("one", now());
    let newer = log.append_optimistic("two", now());

    let outcome = log.reconcile(confirmed("m1", Sender::User, "one"));

    assert_eq!(outcome, Reconciled::Replaced(oldest));
    assert_eq!(log.entries()[0].id, MessageId::Confirmed("m1".to_string()));
    assert_eq!(log.entries()[1].id, MessageId::Pending(newer));
    assert_eq!(log.pending_count(), 1);
}

#[test]
fn test_confirmation_keeps_position_behind_older_entries() {
    let mut log = MessageLog::new();
    let pending = log.append_optimistic("question", now());
    log.append_confirmed(confirmed("b1", Sender::Counterpart, "interjection"));

    log.reconcile(confirmed("u1", Sender::User, "question"));

    assert_eq!(ids(&log), vec!["u1", "b1"]);
    assert!(!log.contains(&MessageId::Pending(pending)));
}

#[test]
fn test_counterpart_message_never_replaces_pending_entry() {
    let mut log = MessageLog::new();
    let pending = log.append_optimistic("hi", now());

    let outcome = log.reconcile(confirmed("b1", Sender::Counterpart, "hello"));

    assert_eq!(outcome, Reconciled::Appended);
    assert_eq!(log.entries()[0].id, MessageId::Pending(pending));
    assert_eq!(log.len(), 2);
}

#[test]
fn test_user_message_without_pending_entry_is_appended() {
    let mut log = MessageLog::new();
    log.append_confirmed(confirmed("b0", Sender::Counterpart, "welcome"));

    let outcome = log.reconcile(confirmed("m1", Sender::User, "from another device"));

    assert_eq!(outcome, Reconciled::Appended);
    assert_eq!(ids(&log), vec!["b0", "m1"]);
}

#[test]
fn test_append_confirmed_rejects_duplicate_ids() {
    let mut log = MessageLog::new();
    assert!(log.append_confirmed(confirmed("m1", Sender::Counterpart, "x")));
    assert!(!log.append_confirmed(confirmed("m1", Sender::Counterpart, "x again")));
    assert_eq!(log.len(), 1);
}

#[test]
fn test_confirm_pending_targets_the_given_entry() {
    let mut log = MessageLog::new();
    let first = log.append_optimistic("one", now());
    let second = log.append_optimistic("two", now());

    let outcome = log.confirm_pending(second, confirmed("u2", Sender::User, "two"));

    assert_eq!(outcome, Reconciled::Replaced(second));
    assert_eq!(log.entries()[0].id, MessageId::Pending(first));
    assert_eq!(log.entries()[1].id, MessageId::Confirmed("u2".to_string()));
}

#[test]
fn test_confirm_pending_drops_entry_already_confirmed_elsewhere() {
    let mut log = MessageLog::new();
    let pending = log.append_optimistic("hi", now());
    log.append_confirmed(confirmed("u1", Sender::User, "hi"));

    let outcome = log.confirm_pending(pending, confirmed("u1", Sender::User, "hi"));

    assert_eq!(outcome, Reconciled::Duplicate);
    assert_eq!(ids(&log), vec!["u1"]);
}

#[test]
fn test_confirm_pending_after_entry_vanished_appends() {
    let mut log = MessageLog::new();
    let pending = log.append_optimistic("hi", now());
    log.remove_pending(pending);

    let outcome = log.confirm_pending(pending, confirmed("u1", Sender::User, "hi"));
    assert_eq!(outcome, Reconciled::Appended);
    assert_eq!(ids(&log), vec!["u1"]);
}

#[test]
fn test_remove_pending_only_removes_matching_entry() {
    let mut log = MessageLog::new();
    let a = log.append_optimistic("a", now());
    let b = log.append_optimistic("b", now());

    assert!(log.remove_pending(a));
    assert!(!log.remove_pending(a));
    assert_eq!(log.entries()[0].id, MessageId::Pending(b));
}

#[test]
fn test_notices_are_local_and_never_reconciled() {
    let mut log = MessageLog::new();
    let notice = log.append_notice("Report is being prepared", now());

    assert!(matches!(notice, MessageId::Local(_)));
    assert_eq!(log.entries()[0].sender, Sender::System);

    log.reconcile(confirmed("m1", Sender::User, "x"));
    assert!(log.contains(&notice));
    assert_eq!(log.len(), 2);
}

#[test]
fn test_replace_confirmed_keeps_pending_at_end() {
    let mut log = MessageLog::new();
    log.append_confirmed(confirmed("old", Sender::User, "stale"));
    log.append_notice("working", now());
    let pending = log.append_optimistic("in flight", now());

    log.replace_confirmed(vec![
        confirmed("u1", Sender::User, "a"),
        confirmed("b1", Sender::Counterpart, "b"),
        confirmed("b1", Sender::Counterpart, "b"),
    ]);

    let pending_id = pending.to_string();
    assert_eq!(ids(&log), vec!["u1", "b1", pending_id.as_str()]);
}

#[test]
fn test_clear_except_keeps_listed_pending_entries() {
    let mut log = MessageLog::new();
    log.append_confirmed(confirmed("m1", Sender::User, "old"));
    let keep = log.append_optimistic("resend me", now());
    log.append_optimistic("other", now());
    let queued = log.append_optimistic("queued", now());

    log.clear_except(&[keep, queued]);

    assert_eq!(log.len(), 2);
    assert_eq!(log.entries()[0].id, MessageId::Pending(keep));
    assert_eq!(log.entries()[1].id, MessageId::Pending(queued));

    log.clear_except(&[]);
    assert!(log.is_empty());
}

#[test]
fn test_ids_stay_unique_across_mixed_operations() {
    let mut log = MessageLog::new();
    let p1 = log.append_optimistic("one", now());
    log.append_confirmed(confirmed("b1", Sender::Counterpart, "r1"));
    log.append_optimistic("two", now());
    log.reconcile(confirmed("u2", Sender::User, "two"));
    log.confirm_pending(p1, confirmed("u1", Sender::User, "one"));
    log.reconcile(confirmed("u2", Sender::User, "two"));
    log.append_confirmed(confirmed("b1", Sender::Counterpart, "r1"));

    let mut seen = std::collections::HashSet::new();
    for message in log.entries() {
        assert!(seen.insert(message.id.clone()), "duplicate {}", message.id);
    }
}
