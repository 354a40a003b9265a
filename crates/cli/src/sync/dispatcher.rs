// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound frame decoding and routing.
//!
//! Every inbound text frame is decoded into exactly one [`InboundEvent`] and
//! applied to the log, the presence signal or the supervisor. A frame that
//! does not decode is logged and dropped without touching any state.

use std::fmt;
use std::sync::LazyLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;

use parley_core::message::{Message, PendingId, Sender};
use parley_core::protocol::{self, ServerFrame, RELOAD_ACTION};
use parley_core::{Countdown, MessageLog, PresenceSignal, Reconciled};

use super::supervisor::ConnectionSupervisor;
use crate::error::{Error, Result};

// Server wording for refused credentials, e.g. "Authentication required"
// or "Access denied".
static AUTH_DENIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"(?i)\bauthenticat(e|ion)\b|access denied") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern"),
    });

const TASK_STARTED_TEXT: &str = "Working on it...";
const TASK_FINISHED_TEXT: &str = "Done.";
const TASK_FAILED_TEXT: &str = "The task failed.";
const AUTH_REJECTED_TEXT: &str = "authentication failed";

/// Returns true if a server error message reads as a credential refusal.
pub fn is_auth_denial(message: &str) -> bool {
    AUTH_DENIAL_RE.is_match(message)
}

/// The closed set of things an inbound frame can mean.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AuthChallenge,
    AuthAccepted,
    AuthRejected { reason: String },
    /// A message pushed by the server, usually from the counterpart.
    MessageDelivered(Message),
    /// The server's confirmation of a message this client sent.
    MessageEcho(Message),
    TypingChanged { actor: Option<Sender>, active: bool },
    LongRunningTaskStarted { notice: String },
    LongRunningTaskFinished {
        notice: String,
        succeeded: bool,
        reload: bool,
    },
    ErrorNotice { message: String },
    KeepAliveAck,
    Unrecognized { kind: String },
}

impl InboundEvent {
    /// Decodes one text frame.
    ///
    /// `now` stamps messages that carry no timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInboundFrame`] if the frame is not a JSON
    /// object with a string `type`, or a known type has bad fields.
    pub fn decode(text: &str, now: DateTime<Utc>) -> Result<Self> {
        let (kind, frame) =
            protocol::parse(text).map_err(|e| Error::MalformedInboundFrame(e.to_string()))?;
        Ok(Self::from_frame(kind, frame, now))
    }

    fn from_frame(kind: String, frame: ServerFrame, now: DateTime<Utc>) -> Self {
        match frame {
            ServerFrame::AuthRequired => InboundEvent::AuthChallenge,
            ServerFrame::AuthSuccess { .. } => InboundEvent::AuthAccepted,
            ServerFrame::AuthError { message } => InboundEvent::AuthRejected {
                reason: message.unwrap_or_else(|| AUTH_REJECTED_TEXT.to_string()),
            },
            ServerFrame::NewMessage { message } => {
                InboundEvent::MessageDelivered(message.into_message(now))
            }
            ServerFrame::MessageSent { message } => {
                InboundEvent::MessageEcho(message.into_message(now))
            }
            ServerFrame::Typing { sender, is_typing } => InboundEvent::TypingChanged {
                actor: sender,
                active: is_typing,
            },
            ServerFrame::TaskStarted { message } => InboundEvent::LongRunningTaskStarted {
                notice: message.unwrap_or_else(|| TASK_STARTED_TEXT.to_string()),
            },
            ServerFrame::TaskFinished { message, action } => {
                InboundEvent::LongRunningTaskFinished {
                    notice: message.unwrap_or_else(|| TASK_FINISHED_TEXT.to_string()),
                    succeeded: true,
                    reload: action.as_deref() == Some(RELOAD_ACTION),
                }
            }
            ServerFrame::TaskFailed { message } => InboundEvent::LongRunningTaskFinished {
                notice: message.unwrap_or_else(|| TASK_FAILED_TEXT.to_string()),
                succeeded: false,
                reload: false,
            },
            ServerFrame::Error { message } => InboundEvent::ErrorNotice { message },
            ServerFrame::Pong => InboundEvent::KeepAliveAck,
            ServerFrame::Unrecognized => InboundEvent::Unrecognized { kind },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::AuthChallenge => "auth_challenge",
            InboundEvent::AuthAccepted => "auth_accepted",
            InboundEvent::AuthRejected { .. } => "auth_rejected",
            InboundEvent::MessageDelivered(_) => "message_delivered",
            InboundEvent::MessageEcho(_) => "message_echo",
            InboundEvent::TypingChanged { .. } => "typing_changed",
            InboundEvent::LongRunningTaskStarted { .. } => "task_started",
            InboundEvent::LongRunningTaskFinished { .. } => "task_finished",
            InboundEvent::ErrorNotice { .. } => "error_notice",
            InboundEvent::KeepAliveAck => "keepalive_ack",
            InboundEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Something the UI layer should tell the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Duplex was given up for the session; sends continue over the
    /// fallback path.
    DuplexDisabled { reason: String },
    TaskStarted(String),
    TaskFinished(String),
    TaskFailed(String),
    /// A server error notice unrelated to authentication.
    Error(String),
    /// A message could not be delivered and was removed from the log.
    SendFailed { content: String, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DuplexDisabled { reason } => {
                write!(f, "live channel disabled ({}), using fallback", reason)
            }
            Notice::TaskStarted(text) | Notice::TaskFinished(text) => write!(f, "{}", text),
            Notice::TaskFailed(text) => write!(f, "task failed: {}", text),
            Notice::Error(text) => write!(f, "server error: {}", text),
            Notice::SendFailed { content, reason } => {
                write!(f, "could not send {:?}: {}", content, reason)
            }
        }
    }
}

/// Change to the presence signal the owner must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// Start (or restart) the expiry countdown.
    Armed(Countdown),
    Cleared,
}

/// What a dispatch changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Dispatched {
    pub messages_changed: bool,
    pub presence: Option<PresenceChange>,
    pub notice: Option<Notice>,
    /// The conversation should be reloaded after a short delay.
    pub reload: bool,
    /// An echo confirmed this unconfirmed entry.
    pub confirmed: Option<PendingId>,
    /// A server error notice unrelated to authentication arrived.
    pub server_error: bool,
}

/// The state an event may touch.
pub struct Targets<'a> {
    pub log: &'a mut MessageLog,
    pub presence: &'a mut PresenceSignal,
    pub supervisor: &'a mut ConnectionSupervisor,
}

/// Applies decoded events to engine state.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    dropped: u64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames dropped as malformed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decodes `raw` and applies it. Malformed frames change nothing.
    pub async fn dispatch(&mut self, raw: &str, targets: Targets<'_>) -> Dispatched {
        match InboundEvent::decode(raw, Utc::now()) {
            Ok(event) => self.apply(event, targets, Instant::now()).await,
            Err(e) => {
                self.dropped += 1;
                tracing::warn!(error = %e, "dropping inbound frame");
                Dispatched::default()
            }
        }
    }

    /// Applies one event.
    pub async fn apply(
        &mut self,
        event: InboundEvent,
        targets: Targets<'_>,
        now: Instant,
    ) -> Dispatched {
        let Targets {
            log,
            presence,
            supervisor,
        } = targets;
        tracing::debug!(kind = event.kind(), "inbound event");
        let mut out = Dispatched::default();

        match event {
            InboundEvent::AuthChallenge => supervisor.on_auth_challenge().await,
            InboundEvent::AuthAccepted => supervisor.on_auth_accepted(),
            InboundEvent::AuthRejected { reason } => {
                tracing::warn!(error = %Error::AuthenticationRejected(reason.clone()), "duplex auth rejected");
                supervisor.disable();
                out.notice = Some(Notice::DuplexDisabled { reason });
            }
            InboundEvent::MessageDelivered(message) => {
                out.messages_changed = log.append_confirmed(message);
            }
            InboundEvent::MessageEcho(message) => {
                let result = log.reconcile(message);
                out.messages_changed = result.changed();
                if let Reconciled::Replaced(pending) = result {
                    out.confirmed = Some(pending);
                }
            }
            InboundEvent::TypingChanged { actor, active } => {
                let actor = actor.unwrap_or(Sender::Counterpart);
                if active {
                    out.presence = presence.set_active(actor, now).map(PresenceChange::Armed);
                } else if actor == Sender::Counterpart && presence.clear() {
                    out.presence = Some(PresenceChange::Cleared);
                }
            }
            InboundEvent::LongRunningTaskStarted { notice } => {
                log.append_notice(notice.clone(), Utc::now());
                out.messages_changed = true;
                out.notice = Some(Notice::TaskStarted(notice));
            }
            InboundEvent::LongRunningTaskFinished {
                notice,
                succeeded,
                reload,
            } => {
                log.append_notice(notice.clone(), Utc::now());
                out.messages_changed = true;
                out.reload = reload;
                out.notice = Some(if succeeded {
                    Notice::TaskFinished(notice)
                } else {
                    Notice::TaskFailed(notice)
                });
            }
            InboundEvent::ErrorNotice { message } if is_auth_denial(&message) => {
                tracing::warn!(message = %message, "server denied access on duplex");
                supervisor.disable();
                out.notice = Some(Notice::DuplexDisabled { reason: message });
            }
            InboundEvent::ErrorNotice { message } => {
                tracing::warn!(message = %message, "server error notice");
                out.server_error = true;
                out.notice = Some(Notice::Error(message));
            }
            InboundEvent::KeepAliveAck => {}
            InboundEvent::Unrecognized { kind } => {
                tracing::debug!(kind = %kind, "ignoring unrecognized frame");
            }
        }
        out
    }
}
