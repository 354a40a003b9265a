// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered, deduplicated view of a conversation.
//!
//! Insertion order is display order. Optimistic entries are inserted with a
//! [`PendingId`] and later replaced in place by their confirmed counterpart,
//! so a confirmation never moves a message ahead of an older unconfirmed one.
//!
//! The log never holds two entries with the same confirmed id.

use chrono::{DateTime, Utc};

use crate::message::{Message, MessageId, PendingId, Sender};

/// Outcome of reconciling a server-confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The given unconfirmed entry was replaced in place.
    Replaced(PendingId),
    /// No matching unconfirmed entry; the message was appended.
    Appended,
    /// An entry with the same confirmed id already exists.
    Duplicate,
}

impl Reconciled {
    /// Returns true if the log changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Reconciled::Duplicate)
    }
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
    next_pending: u64,
    next_local: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|m| m.is_pending()).count()
    }

    /// Returns true if an entry with this id exists.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.iter().any(|m| &m.id == id)
    }

    fn contains_confirmed(&self, id: &str) -> bool {
        self.entries
            .iter()
            .any(|m| m.id.confirmed().is_some_and(|c| c == id))
    }

    fn position_of(&self, pending: PendingId) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| m.id == MessageId::Pending(pending))
    }

    /// Appends a message from the local user before the server has seen it.
    ///
    /// Pending ids are never reused for the lifetime of the log.
    pub fn append_optimistic(&mut self, content: impl Into<String>, now: DateTime<Utc>) -> PendingId {
        self.next_pending += 1;
        let id = PendingId::new(self.next_pending);
        self.entries.push(Message::pending(id, content, now));
        id
    }

    /// Matches a server-confirmed message against the log.
    ///
    /// Order of checks:
    /// 1. An entry with the same confirmed id exists: no-op.
    /// 2. The message is from the local user and an unconfirmed entry exists:
    ///    the oldest unconfirmed entry is replaced in place.
    /// 3. Otherwise the message is appended.
    pub fn reconcile(&mut self, message: Message) -> Reconciled {
        let Some(id) = message.id.confirmed() else {
            return Reconciled::Duplicate;
        };
        if self.contains_confirmed(id) {
            return Reconciled::Duplicate;
        }
        if message.sender == Sender::User {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .find_map(|(idx, m)| m.id.pending().map(|pending| (idx, pending)));
            if let Some((idx, pending)) = oldest {
                self.entries[idx] = message;
                return Reconciled::Replaced(pending);
            }
        }
        self.entries.push(message);
        Reconciled::Appended
    }

    /// Appends a message with no optimistic counterpart, unless its id is
    /// already present. Returns true if appended.
    pub fn append_confirmed(&mut self, message: Message) -> bool {
        let duplicate = match message.id.confirmed() {
            Some(id) => self.contains_confirmed(id),
            None => self.contains(&message.id),
        };
        if duplicate {
            return false;
        }
        self.entries.push(message);
        true
    }

    /// Replaces a specific unconfirmed entry with its confirmation.
    ///
    /// If the confirmed id is already present, the unconfirmed entry is
    /// removed instead. If the unconfirmed entry is gone, this behaves like
    /// [`MessageLog::append_confirmed`].
    pub fn confirm_pending(&mut self, pending: PendingId, message: Message) -> Reconciled {
        let already = message
            .id
            .confirmed()
            .is_some_and(|id| self.contains_confirmed(id));
        match self.position_of(pending) {
            Some(idx) if already => {
                self.entries.remove(idx);
                Reconciled::Duplicate
            }
            Some(idx) => {
                self.entries[idx] = message;
                Reconciled::Replaced(pending)
            }
            None if self.append_confirmed(message) => Reconciled::Appended,
            None => Reconciled::Duplicate,
        }
    }

    /// Removes an unconfirmed entry after a definitive send failure.
    pub fn remove_pending(&mut self, pending: PendingId) -> bool {
        match self.position_of(pending) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Appends an engine-generated system notice.
    pub fn append_notice(&mut self, content: impl Into<String>, now: DateTime<Utc>) -> MessageId {
        self.next_local += 1;
        let id = MessageId::Local(self.next_local);
        self.entries.push(Message {
            id: id.clone(),
            sender: Sender::System,
            content: content.into(),
            created_at: now,
        });
        id
    }

    /// Replaces all confirmed history with `messages`.
    ///
    /// Unconfirmed entries are kept, after the new history. Local notices are
    /// dropped. Duplicate ids in `messages` keep their first occurrence.
    pub fn replace_confirmed(&mut self, messages: Vec<Message>) {
        let pending: Vec<Message> = self.entries.drain(..).filter(|m| m.is_pending()).collect();
        for message in messages {
            self.append_confirmed(message);
        }
        self.entries.extend(pending);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Clears everything except the given unconfirmed entries.
    pub fn clear_except(&mut self, keep: &[PendingId]) {
        self.entries
            .retain(|m| m.id.pending().is_some_and(|p| keep.contains(&p)));
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
