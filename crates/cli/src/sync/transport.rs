// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstraction for the duplex channel.
//!
//! Provides a trait-based transport layer that enables:
//! - Real WebSocket connections for production
//! - Mock transports for unit testing
//!
//! A connected channel is split into a [`FrameSink`] and a [`FrameStream`]
//! so that reading can run in its own task while the owner writes.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_core::protocol::ClientFrame;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// What a channel read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A UTF-8 text frame, not yet parsed.
    Text(String),
    /// The channel closed, with the peer's close code if it sent one.
    Closed { code: Option<u16> },
}

/// Writing half of a connected channel.
pub trait FrameSink: Send {
    /// Sends a frame and flushes it.
    fn send(&mut self, frame: ClientFrame) -> TransportFuture<'_, ()>;

    /// Closes the channel.
    fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// Reading half of a connected channel.
pub trait FrameStream: Send {
    /// Waits for the next text frame or the close.
    fn recv(&mut self) -> TransportFuture<'_, Inbound>;
}

/// A connected channel.
pub struct Duplex {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Transport trait for WebSocket-like communication.
///
/// This trait abstracts over the actual transport mechanism, allowing
/// for easy testing with mock implementations.
pub trait Transport: Send + Sync {
    /// Opens a channel to `url`.
    fn connect(&self, url: &str) -> TransportFuture<'_, Duplex>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport implementation using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    pub fn new() -> Self {
        WebSocketTransport
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str) -> TransportFuture<'_, Duplex> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let (sink, stream) = ws_stream.split();
            Ok(Duplex {
                sink: Box::new(WebSocketSink { sink }),
                stream: Box::new(WebSocketReader { stream }),
            })
        })
    }
}

impl FrameSink for WebSocketSink {
    fn send(&mut self, frame: ClientFrame) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let json = frame
                .to_json()
                .map_err(|e| TransportError::SerializationError(e.to_string()))?;

            self.sink
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;

            // Flush so a broken connection surfaces here rather than later
            self.sink
                .flush()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.sink
                .close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
    }
}

impl FrameStream for WebSocketReader {
    fn recv(&mut self) -> TransportFuture<'_, Inbound> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Inbound::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(Inbound::Closed {
                            code: frame.map(|f| u16::from(f.code)),
                        });
                    }
                    Some(Ok(_)) => {
                        // Ping/pong and binary frames carry nothing for us
                        continue;
                    }
                    Some(Err(e)) => {
                        return Err(TransportError::ReceiveFailed(e.to_string()));
                    }
                    None => {
                        return Ok(Inbound::Closed { code: None });
                    }
                }
            }
        })
    }
}
