// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex channel frames.
//!
//! Every frame is a UTF-8 JSON object with a `type` discriminator:
//! - Client sends authentication, messages, composing state and pings
//! - Server pushes messages, presence, task progress and errors

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{Sender, WireMessage};

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Credential exchange right after the channel opens.
    Auth { token: String },

    /// Post a message to the active conversation.
    SendMessage { content: String },

    /// Local composing indicator.
    Typing { is_typing: bool },

    /// Keepalive ping, answered with `pong`.
    Ping,
}

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The server expects an `auth` frame before anything else.
    AuthRequired,

    AuthSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    AuthError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A message that did not originate from this client's send.
    NewMessage { message: WireMessage },

    /// Echo of a message this client sent over the duplex channel.
    MessageSent { message: WireMessage },

    /// Composing indicator of another participant.
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Sender>,
        #[serde(default)]
        is_typing: bool,
    },

    /// A long-running server task has begun.
    #[serde(rename = "doctor_report_processing", alias = "task_started")]
    TaskStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A long-running server task completed.
    ///
    /// `action == "reload_chat"` asks the client to refetch the conversation.
    #[serde(rename = "doctor_report_ready", alias = "task_finished")]
    TaskFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },

    #[serde(rename = "doctor_report_error", alias = "task_failed")]
    TaskFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Error {
        #[serde(default)]
        message: String,
    },

    Pong,

    /// Any `type` this client does not know.
    #[serde(other)]
    Unrecognized,
}

/// Action value on [`ServerFrame::TaskFinished`] that requests a reload.
pub const RELOAD_ACTION: &str = "reload_chat";

impl ClientFrame {
    pub fn auth(token: impl Into<String>) -> Self {
        ClientFrame::Auth {
            token: token.into(),
        }
    }

    pub fn send_message(content: impl Into<String>) -> Self {
        ClientFrame::SendMessage {
            content: content.into(),
        }
    }

    pub fn typing(is_typing: bool) -> Self {
        ClientFrame::Typing { is_typing }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerFrame {
    pub fn new_message(message: WireMessage) -> Self {
        ServerFrame::NewMessage { message }
    }

    pub fn message_sent(message: WireMessage) -> Self {
        ServerFrame::MessageSent { message }
    }

    pub fn typing(sender: Sender, is_typing: bool) -> Self {
        ServerFrame::Typing {
            sender: Some(sender),
            is_typing,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// Returns true if this is a finished task asking for a reload.
    pub fn requests_reload(&self) -> bool {
        matches!(
            self,
            ServerFrame::TaskFinished { action: Some(action), .. } if action == RELOAD_ACTION
        )
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Parses raw inbound text into its `type` tag and typed frame.
///
/// Text that is not a JSON object or lacks a string `type` is
/// [`Error::MalformedFrame`]; a known `type` with bad fields is
/// [`Error::Json`].
pub fn parse(text: &str) -> Result<(String, ServerFrame)> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))?;
    let kind = value
        .as_object()
        .ok_or_else(|| Error::MalformedFrame("frame is not a JSON object".to_string()))?
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::MalformedFrame("missing string 'type' field".to_string()))?
        .to_string();
    let frame = serde_json::from_value(value)?;
    Ok((kind, frame))
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
