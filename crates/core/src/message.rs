// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation messages and their identities.
//!
//! A message shown locally before the server has confirmed it carries a
//! [`PendingId`]; once confirmed it carries the server-assigned id. The two
//! never share a namespace, so a server id can never be mistaken for a
//! locally generated one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The local user.
    User,
    /// The remote party the user is talking to.
    #[serde(rename = "bot", alias = "assistant", alias = "counterpart")]
    Counterpart,
    /// Notices generated by the service or the engine.
    System,
}

impl Sender {
    /// Returns the string representation used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Counterpart => "bot",
            Sender::System => "system",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Sender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Sender::User),
            "bot" | "assistant" | "counterpart" => Ok(Sender::Counterpart),
            "system" => Ok(Sender::System),
            _ => Err(Error::InvalidSender(s.to_string())),
        }
    }
}

/// Locally generated id of a message that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(u64);

impl PendingId {
    pub fn new(seq: u64) -> Self {
        PendingId(seq)
    }

    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending-{}", self.0)
    }
}

/// Identity of a message in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Shown optimistically, awaiting server confirmation.
    Pending(PendingId),
    /// Assigned by the server.
    Confirmed(String),
    /// Engine-generated notice that never reaches the server.
    Local(u64),
}

impl MessageId {
    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending(_))
    }

    /// Returns the server-assigned id, if confirmed.
    pub fn confirmed(&self) -> Option<&str> {
        match self {
            MessageId::Confirmed(id) => Some(id),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<PendingId> {
        match self {
            MessageId::Pending(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Pending(id) => write!(f, "{}", id),
            MessageId::Confirmed(id) => write!(f, "{}", id),
            MessageId::Local(n) => write!(f, "local-{}", n),
        }
    }
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a server-confirmed message.
    pub fn confirmed(
        id: impl Into<String>,
        sender: Sender,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Message {
            id: MessageId::Confirmed(id.into()),
            sender,
            content: content.into(),
            created_at,
        }
    }

    /// Creates an unconfirmed message authored by the local user.
    pub fn pending(id: PendingId, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Message {
            id: MessageId::Pending(id),
            sender: Sender::User,
            content: content.into(),
            created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }
}

/// Message payload as it appears in server frames and API responses.
///
/// Decoding is lenient: ids may be strings or integers, and timestamps may
/// be RFC 3339, naive ISO-8601 (taken as UTC), or absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub sender: Sender,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireMessage {
    pub fn new(id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        WireMessage {
            id: id.into(),
            sender,
            content: content.into(),
            created_at: None,
        }
    }

    /// Converts into a confirmed [`Message`], stamping `now` if the server
    /// omitted a timestamp.
    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        Message::confirmed(
            self.id,
            self.sender,
            self.content,
            self.created_at.unwrap_or(now),
        )
    }
}

/// Parses a server timestamp.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form, which
/// is interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Deserializes an id that may be encoded as a string or an integer.
pub fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Deserializes an optional timestamp with [`parse_timestamp`]; unparseable
/// values become `None`.
pub fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
