// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the engine handle operations.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::api::{ApiError, ChatApi};
use super::api_tests::{ApiCall, MockChatApi};
use super::dispatcher::Notice;
use super::engine::{Engine, EngineHandle};
use super::supervisor::ConnectionState;
use super::transport_tests::MockTransport;
use crate::config::Config;
use crate::credential::{CredentialProvider, StaticCredential};
use crate::error::Error;
use parley_core::message::{Message, MessageId, Sender, WireMessage};
use parley_core::protocol::{ClientFrame, ServerFrame};
use parley_core::Presence;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(60);

/// An engine wired to scriptable doubles.
pub struct Harness {
    pub api: MockChatApi,
    pub transport: MockTransport,
    pub handle: EngineHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Config::default(), StaticCredential::new("tok"))
    }

    pub fn with(config: Config, credential: impl CredentialProvider + 'static) -> Self {
        let api = MockChatApi::new();
        let transport = MockTransport::new();
        let handle = Engine::spawn(
            &config,
            Arc::new(api.clone()),
            Arc::new(transport.clone()),
            Arc::new(credential),
        );
        Harness {
            api,
            transport,
            handle,
        }
    }

    pub fn without_duplex() -> Self {
        let mut config = Config::default();
        config.duplex.enabled = false;
        Self::with(config, StaticCredential::new("tok"))
    }

    /// Waits until the engine has handled every command sent before it.
    pub async fn barrier(&self) {
        let result = self.handle.send_message("").await;
        assert!(matches!(result, Err(Error::EmptyMessage)));
    }

    pub async fn wait_messages(&self, mut pred: impl FnMut(&[Message]) -> bool) -> Vec<Message> {
        let mut rx = self.handle.subscribe_messages();
        let messages = tokio::time::timeout(WAIT, rx.wait_for(|m| pred(m)))
            .await
            .expect("timed out waiting for messages")
            .expect("engine stopped")
            .clone();
        messages
    }

    pub async fn wait_state(&self, state: ConnectionState) {
        let mut rx = self.handle.subscribe_connection_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for connection state")
            .expect("engine stopped");
    }

    pub async fn wait_presence(&self, active: bool) -> Presence {
        let mut rx = self.handle.subscribe_presence();
        let presence = *tokio::time::timeout(WAIT, rx.wait_for(|p| p.active == active))
            .await
            .expect("timed out waiting for presence")
            .expect("engine stopped");
        presence
    }

    /// Starts a conversation and waits for its channel.
    pub async fn connected(&self) -> String {
        let id = self.handle.start_new_conversation().await.unwrap();
        self.wait_state(ConnectionState::Connected).await;
        id
    }
}

pub async fn next_notice(rx: &mut broadcast::Receiver<Notice>) -> Notice {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice channel closed")
}

fn wire(id: &str, sender: Sender, content: &str) -> WireMessage {
    WireMessage::new(id, sender, content)
}

#[tokio::test]
async fn test_blank_message_is_rejected_locally() {
    let h = Harness::new();

    let err = h.handle.send_message("  \n ").await.unwrap_err();

    assert!(matches!(err, Error::EmptyMessage));
    assert!(h.api.calls().is_empty());
    assert!(h.handle.messages().is_empty());
}

#[tokio::test]
async fn test_send_failure_rolls_back_and_notifies() {
    let h = Harness::new();
    let mut notices = h.handle.subscribe_notices();
    h.api.fail_next_create(ApiError::Network("offline".to_string()));

    let err = h.handle.send_message("hi").await.unwrap_err();

    assert!(matches!(err, Error::SendFailed(ApiError::Network(_))));
    assert!(h.handle.messages().is_empty());
    assert_eq!(h.handle.conversation_id(), None);
    match next_notice(&mut notices).await {
        Notice::SendFailed { content, .. } => assert_eq!(content, "hi"),
        other => panic!("unexpected notice {:?}", other),
    }
}

#[tokio::test]
async fn test_select_conversation_loads_history_and_opens_channel() {
    let h = Harness::new();
    h.api.seed(
        "c7",
        vec![
            wire("1", Sender::User, "hello"),
            wire("2", Sender::Counterpart, "hi there"),
        ],
    );

    h.handle.select_conversation("c7").await.unwrap();
    h.wait_state(ConnectionState::Connected).await;

    let messages = h.handle.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].sender, Sender::Counterpart);
    assert_eq!(h.handle.conversation_id().as_deref(), Some("c7"));
    assert_eq!(h.transport.urls(), vec!["ws://localhost:10400/chat/ws/c7?token=tok"]);
}

#[tokio::test]
async fn test_select_unknown_conversation_changes_nothing() {
    let h = Harness::new();
    let id = h.connected().await;

    let err = h.handle.select_conversation("missing").await.unwrap_err();

    assert!(matches!(err, Error::RemoteConversationInvalid(ref c) if c == "missing"));
    assert_eq!(h.handle.conversation_id(), Some(id));
    assert_eq!(h.handle.connection_state(), ConnectionState::Connected);
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test]
async fn test_select_failure_other_than_rejection_is_api_error() {
    let h = Harness::new();
    h.api.seed("c7", Vec::new());
    h.api.fail_next_get(ApiError::Unauthorized);

    let err = h.handle.select_conversation("c7").await.unwrap_err();

    assert!(matches!(err, Error::Api(ApiError::Unauthorized)));
    assert_eq!(h.handle.conversation_id(), None);
}

#[tokio::test]
async fn test_start_new_conversation_switches_and_resets() {
    let h = Harness::without_duplex();
    h.handle.send_message("first").await.unwrap();
    assert_eq!(h.handle.messages().len(), 2);

    let id = h.handle.start_new_conversation().await.unwrap();

    assert_eq!(id, "c3");
    assert_eq!(h.handle.conversation_id().as_deref(), Some("c3"));
    assert!(h.handle.messages().is_empty());
    assert_eq!(h.transport.connect_count(), 0);
}

#[tokio::test]
async fn test_clear_all_conversations_resets_engine() {
    let h = Harness::new();
    h.connected().await;
    h.transport.push_text(r#"{"type":"new_message","message":{"id":"m1","sender":"bot","content":"x"}}"#);
    h.wait_messages(|m| m.len() == 1).await;

    h.handle.clear_all_conversations().await.unwrap();

    assert!(h.handle.messages().is_empty());
    assert_eq!(h.handle.conversation_id(), None);
    assert_eq!(h.handle.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.api.calls().last(), Some(&ApiCall::Delete));
}

#[tokio::test]
async fn test_list_conversations_passes_through() {
    let h = Harness::new();
    h.api.seed("a", Vec::new());
    h.api.seed("b", Vec::new());

    let list = h.handle.list_conversations().await.unwrap();

    let ids: Vec<&str> = list.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_set_composing_only_over_connected_duplex() {
    let h = Harness::new();
    h.handle.set_composing(true).await;
    h.barrier().await;
    assert!(h.transport.sent().is_empty());

    h.connected().await;
    h.handle.set_composing(true).await;
    h.handle.set_composing(false).await;
    h.barrier().await;

    assert_eq!(
        h.transport.sent(),
        vec![ClientFrame::typing(true), ClientFrame::typing(false)]
    );
}

#[tokio::test]
async fn test_set_composing_failure_is_silent() {
    let h = Harness::new();
    h.connected().await;
    h.transport.set_send_fail(true);

    h.handle.set_composing(true).await;
    h.barrier().await;

    assert_eq!(h.handle.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let h = Harness::new();
    h.connected().await;

    h.handle.shutdown().await;

    assert!(matches!(
        h.handle.send_message("late").await,
        Err(Error::EngineStopped)
    ));
    assert_eq!(h.handle.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_presence_expires_after_timeout() {
    let h = Harness::new();
    h.connected().await;

    h.transport
        .push_frame(&ServerFrame::typing(Sender::Counterpart, true));
    let presence = h.wait_presence(true).await;
    assert_eq!(presence.actor, Some(Sender::Counterpart));
    let start = Instant::now();

    h.wait_presence(false).await;
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_typing_restarts_countdown() {
    let h = Harness::new();
    h.connected().await;

    h.transport
        .push_frame(&ServerFrame::typing(Sender::Counterpart, true));
    h.wait_presence(true).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.transport
        .push_frame(&ServerFrame::typing(Sender::Counterpart, true));
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.handle.presence().active);

    h.wait_presence(false).await;
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_typing_stop_clears_presence() {
    let h = Harness::new();
    h.connected().await;

    h.transport
        .push_frame(&ServerFrame::typing(Sender::Counterpart, true));
    h.wait_presence(true).await;
    let start = Instant::now();
    h.transport
        .push_frame(&ServerFrame::typing(Sender::Counterpart, false));

    h.wait_presence(false).await;
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_reload_runs_one_second_after_request() {
    let h = Harness::new();
    let id = h.connected().await;
    h.api.send_to_conversation(&id, "from elsewhere").await.unwrap();

    h.transport.push_text(
        r#"{"type":"doctor_report_ready","message":"Report ready","action":"reload_chat"}"#,
    );
    h.wait_messages(|m| m.len() == 1 && m[0].sender == Sender::System)
        .await;
    let start = Instant::now();

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!h
        .api
        .calls()
        .contains(&ApiCall::Get { conversation_id: id.clone() }));

    let messages = h
        .wait_messages(|m| m.len() == 2 && m.iter().all(|e| e.sender != Sender::System))
        .await;
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(messages[0].content, "from elsewhere");
    assert_eq!(messages[1].content, "echo: from elsewhere");
}

#[tokio::test(start_paused = true)]
async fn test_reload_is_cancelled_by_conversation_change() {
    let h = Harness::new();
    let first = h.connected().await;

    h.transport
        .push_text(r#"{"type":"doctor_report_ready","action":"reload_chat"}"#);
    h.wait_messages(|m| m.len() == 1).await;
    h.handle.start_new_conversation().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.barrier().await;

    assert!(!h
        .api
        .calls()
        .contains(&ApiCall::Get { conversation_id: first }));
}

#[tokio::test]
async fn test_engine_ids_survive_round_trip_through_handle() {
    let h = Harness::without_duplex();

    let id = h.handle.send_message("hi").await.unwrap();

    assert_eq!(id, MessageId::Confirmed("u2".to_string()));
    assert_eq!(h.handle.messages()[0].id, id);
}
