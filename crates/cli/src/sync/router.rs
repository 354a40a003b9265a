// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-message transport choice.
//!
//! The duplex path is tried only when the channel is Connected at call
//! time; otherwise, or if the duplex write fails, the same call falls back
//! to request/response. The router holds no state of its own, so the
//! fallback half can run on a task of its own.

use std::sync::Arc;

use parley_core::protocol::ClientFrame;

use super::api::{ChatApi, SentReply, StartedConversation};
use super::supervisor::ConnectionSupervisor;
use crate::error::{Error, Result};

/// How a message was delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Written to the duplex channel; confirmation arrives as an echo frame.
    Duplex,
    /// No conversation existed; one was created with this message.
    Created(StartedConversation),
    /// Sent to the existing conversation.
    Sent {
        conversation_id: String,
        reply: SentReply,
    },
    /// The existing conversation was rejected; a replacement was created
    /// with this message.
    Recreated {
        stale: String,
        started: StartedConversation,
    },
}

/// Chooses the path for each outgoing message.
#[derive(Clone)]
pub struct TransportRouter {
    api: Arc<dyn ChatApi>,
}

impl TransportRouter {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        TransportRouter { api }
    }

    /// Sends `content` to `conversation`, or to a new conversation if none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailed`] if the fallback path fails, including a
    /// failed retry after the conversation was rejected.
    pub async fn send(
        &self,
        supervisor: &mut ConnectionSupervisor,
        conversation: Option<&str>,
        content: &str,
    ) -> Result<Route> {
        if self.try_duplex(supervisor, conversation, content).await {
            return Ok(Route::Duplex);
        }
        self.fallback(conversation, content).await
    }

    /// Writes `content` to the duplex channel if it is Connected.
    ///
    /// Returns false when the caller must use [`TransportRouter::fallback`].
    pub async fn try_duplex(
        &self,
        supervisor: &mut ConnectionSupervisor,
        conversation: Option<&str>,
        content: &str,
    ) -> bool {
        if conversation.is_none() || !supervisor.is_connected() {
            return false;
        }
        match supervisor
            .send_frame(ClientFrame::send_message(content))
            .await
        {
            Ok(()) => {
                tracing::debug!("message sent over duplex");
                true
            }
            Err(e) => {
                tracing::warn!(error = %Error::TransportUnavailable(e), "duplex send failed, falling back");
                false
            }
        }
    }

    /// Sends over request/response only.
    pub async fn fallback(&self, conversation: Option<&str>, content: &str) -> Result<Route> {
        let Some(conversation_id) = conversation else {
            tracing::debug!("no conversation yet, creating one");
            let started = self
                .api
                .create_conversation_with_message(content)
                .await
                .map_err(Error::SendFailed)?;
            return Ok(Route::Created(started));
        };

        match self.api.send_to_conversation(conversation_id, content).await {
            Ok(reply) => Ok(Route::Sent {
                conversation_id: conversation_id.to_string(),
                reply,
            }),
            Err(e) if e.is_conversation_rejected() => {
                tracing::warn!(
                    error = %Error::RemoteConversationInvalid(conversation_id.to_string()),
                    cause = %e,
                    "recreating conversation"
                );
                let started = self
                    .api
                    .create_conversation_with_message(content)
                    .await
                    .map_err(Error::SendFailed)?;
                Ok(Route::Recreated {
                    stale: conversation_id.to_string(),
                    started,
                })
            }
            Err(e) => Err(Error::SendFailed(e)),
        }
    }
}
