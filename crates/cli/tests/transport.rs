// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests for the WebSocket transport.
//!
//! These run `WebSocketTransport` and the connection supervisor against an
//! in-process `tokio-tungstenite` server, covering the real handshake, text
//! frames in both directions and close codes.

#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use parley::config::DuplexConfig;
use parley::sync::{
    ChannelSignal, ConnectionState, ConnectionSupervisor, Inbound, Transport, WebSocketTransport,
};
use parley_core::protocol::ClientFrame;

const TIMEOUT: Duration = Duration::from_secs(10);

/// A server that hands each accepted socket, with its request path, to the
/// test.
struct TestServer {
    port: u16,
    accepted: mpsc::UnboundedReceiver<(String, WebSocketStream<TcpStream>)>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, accepted) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (path_tx, path_rx) = std::sync::mpsc::channel();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = path_tx.send(req.uri().to_string());
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let path = path_rx.recv().unwrap_or_default();
                if tx.send((path, ws)).is_err() {
                    return;
                }
            }
        });
        TestServer { port, accepted }
    }

    async fn accept(&mut self) -> (String, WebSocketStream<TcpStream>) {
        tokio::time::timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("no connection")
            .expect("server stopped")
    }

    fn config(&self) -> DuplexConfig {
        DuplexConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            reconnect_delay_ms: 100,
            ..DuplexConfig::default()
        }
    }
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let message = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("no frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return text.as_str().to_string();
        }
    }
}

async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: u16) {
    ws.close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "bye".into(),
    }))
    .await
    .unwrap();
}

async fn step(
    supervisor: &mut ConnectionSupervisor,
    signals: &mut mpsc::UnboundedReceiver<ChannelSignal>,
) -> Option<String> {
    let signal = tokio::time::timeout(TIMEOUT, signals.recv())
        .await
        .expect("no signal")
        .expect("signals closed");
    supervisor.handle(signal).await
}

#[tokio::test]
async fn test_transport_exchanges_text_frames() {
    let mut server = TestServer::start().await;
    let url = format!("ws://127.0.0.1:{}/chat/ws/c1", server.port);

    let mut duplex = WebSocketTransport::new().connect(&url).await.unwrap();
    let (path, mut ws) = server.accept().await;
    assert_eq!(path, "/chat/ws/c1");

    duplex
        .sink
        .send(ClientFrame::send_message("hello"))
        .await
        .unwrap();
    let text = next_text(&mut ws).await;
    assert_eq!(
        ClientFrame::from_json(&text).unwrap(),
        ClientFrame::send_message("hello")
    );

    ws.send(Message::Text(r#"{"type":"pong"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        duplex.stream.recv().await.unwrap(),
        Inbound::Text(r#"{"type":"pong"}"#.to_string())
    );

    close_with(&mut ws, 1000).await;
    assert_eq!(
        duplex.stream.recv().await.unwrap(),
        Inbound::Closed { code: Some(1000) }
    );
}

#[tokio::test]
async fn test_transport_connect_refused_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = WebSocketTransport::new()
        .connect(&format!("ws://127.0.0.1:{}/chat/ws/c1", port))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_supervisor_connects_with_token_and_receives_frames() {
    let mut server = TestServer::start().await;
    let (mut supervisor, mut signals) =
        ConnectionSupervisor::new(Arc::new(WebSocketTransport::new()), server.config());

    supervisor.open("chat 1", Some("s3cret".to_string()));
    step(&mut supervisor, &mut signals).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);

    let (path, mut ws) = server.accept().await;
    assert_eq!(path, "/chat/ws/chat%201?token=s3cret");

    ws.send(Message::Text(
        r#"{"type":"new_message","message":{"id":"m1","sender":"bot","content":"hi"}}"#.into(),
    ))
    .await
    .unwrap();
    let text = step(&mut supervisor, &mut signals).await.unwrap();
    assert!(text.contains("\"m1\""));

    supervisor
        .send_frame(ClientFrame::typing(true))
        .await
        .unwrap();
    assert_eq!(
        ClientFrame::from_json(&next_text(&mut ws).await).unwrap(),
        ClientFrame::typing(true)
    );
}

#[tokio::test]
async fn test_supervisor_reconnects_after_unexpected_close() {
    let mut server = TestServer::start().await;
    let (mut supervisor, mut signals) =
        ConnectionSupervisor::new(Arc::new(WebSocketTransport::new()), server.config());

    supervisor.open("c1", None);
    step(&mut supervisor, &mut signals).await;
    let (_, mut ws) = server.accept().await;

    close_with(&mut ws, 1011).await;
    step(&mut supervisor, &mut signals).await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(supervisor.reconnect_pending());

    step(&mut supervisor, &mut signals).await;
    assert_eq!(supervisor.state(), ConnectionState::Connecting);
    step(&mut supervisor, &mut signals).await;
    assert!(supervisor.is_connected());
    let (path, _ws) = server.accept().await;
    assert_eq!(path, "/chat/ws/c1");
}

#[tokio::test]
async fn test_supervisor_stays_down_after_policy_close() {
    let mut server = TestServer::start().await;
    let (mut supervisor, mut signals) =
        ConnectionSupervisor::new(Arc::new(WebSocketTransport::new()), server.config());

    supervisor.open("c1", None);
    step(&mut supervisor, &mut signals).await;
    let (_, mut ws) = server.accept().await;

    close_with(&mut ws, 4001).await;
    step(&mut supervisor, &mut signals).await;

    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(!supervisor.reconnect_pending());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(signals.try_recv().is_err());
    assert!(tokio::time::timeout(Duration::from_millis(200), server.accepted.recv())
        .await
        .is_err());
}
