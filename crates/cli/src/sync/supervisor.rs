// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex channel lifecycle.
//!
//! The supervisor owns the one channel of the active conversation. It never
//! blocks its owner: connecting, reading and timers run in spawned tasks that
//! report back as [`ChannelSignal`]s, which the owner feeds to
//! [`ConnectionSupervisor::handle`] on its own queue.
//!
//! Every channel attempt gets a new generation number. Signals carrying an
//! older generation are dropped, so nothing from a torn-down channel is ever
//! acted on.
//!
//! ```text
//! Disconnected ──open──► Connecting ──opened──► Authenticating ──accepted──► Connected
//!      ▲                     │                        │  (handshake mode)        │
//!      │◄──── failed ────────┘                        └──rejected──► Errored     │
//!      │◄──────────────────────── closed ───────────────────────────────────────┘
//! ```
//!
//! After an unexpected close or failed connect a single reconnect is
//! scheduled after a fixed delay. A close with [`POLICY_REJECTED_CLOSE_CODE`]
//! never reconnects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use parley_core::protocol::ClientFrame;

use super::transport::{Duplex, FrameSink, Inbound, Transport, TransportError, TransportResult};
use crate::config::{AuthMode, DuplexConfig};

/// Close code the server uses to refuse a channel by policy.
pub const POLICY_REJECTED_CLOSE_CODE: u16 = 4001;

/// State of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Open, waiting for the server to accept the credential.
    Authenticating,
    Connected,
    /// Duplex is unusable for the rest of the session.
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events reported by the supervisor's background tasks.
pub enum ChannelSignal {
    Opened { generation: u64, duplex: Duplex },
    Failed { generation: u64, error: TransportError },
    Frame { generation: u64, text: String },
    Closed { generation: u64, code: Option<u16> },
    ReconnectDue { generation: u64 },
    KeepAliveDue { generation: u64 },
}

impl fmt::Debug for ChannelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { generation, .. } => f
                .debug_struct("Opened")
                .field("generation", generation)
                .field("duplex", &"<duplex>")
                .finish(),
            Self::Failed { generation, error } => f
                .debug_struct("Failed")
                .field("generation", generation)
                .field("error", error)
                .finish(),
            Self::Frame { generation, text } => f
                .debug_struct("Frame")
                .field("generation", generation)
                .field("text", text)
                .finish(),
            Self::Closed { generation, code } => f
                .debug_struct("Closed")
                .field("generation", generation)
                .field("code", code)
                .finish(),
            Self::ReconnectDue { generation } => f
                .debug_struct("ReconnectDue")
                .field("generation", generation)
                .finish(),
            Self::KeepAliveDue { generation } => f
                .debug_struct("KeepAliveDue")
                .field("generation", generation)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    conversation_id: String,
    credential: Option<String>,
}

/// Owns the duplex channel, its reconnect timer and its auth handshake.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    config: DuplexConfig,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    state_tx: watch::Sender<ConnectionState>,
    target: Option<Target>,
    generation: u64,
    /// Cancels every task of the current generation.
    cancel: CancellationToken,
    sink: Option<Box<dyn FrameSink>>,
    reconnect_pending: bool,
    disabled: bool,
}

impl ConnectionSupervisor {
    /// Creates a supervisor.
    ///
    /// Returns the supervisor and the receiver its tasks report on.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: DuplexConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelSignal>) {
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let supervisor = ConnectionSupervisor {
            transport,
            config,
            signals,
            state_tx,
            target: None,
            generation: 0,
            cancel: CancellationToken::new(),
            sink: None,
            reconnect_pending: false,
            disabled: false,
        };
        (supervisor, signals_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// True once duplex has been given up for this session.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.conversation_id.as_str())
    }

    /// Returns true if `generation` belongs to the current channel.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::info!(from = %state, to = %next, "duplex state changed");
            *state = next;
            true
        });
        if !changed {
            tracing::trace!(state = %next, "duplex state unchanged");
        }
    }

    /// Establishes (or reuses) the channel for a conversation.
    ///
    /// A no-op if the same conversation is already connecting, connected,
    /// authenticating or waiting to reconnect.
    pub fn open(&mut self, conversation_id: &str, credential: Option<String>) {
        if self.disabled || !self.config.enabled {
            tracing::debug!(conversation_id, "duplex disabled, not opening");
            return;
        }
        let same = self
            .target
            .as_ref()
            .is_some_and(|t| t.conversation_id == conversation_id);
        let live = matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Connected
        );
        if same && (live || self.reconnect_pending) {
            tracing::debug!(conversation_id, "duplex already open");
            return;
        }

        self.teardown();
        self.target = Some(Target {
            conversation_id: conversation_id.to_string(),
            credential,
        });
        self.start_connect();
    }

    /// Tears the channel down and cancels any pending reconnect.
    pub fn close(&mut self) {
        self.teardown();
        self.target = None;
        if self.disabled {
            self.set_state(ConnectionState::Errored);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Stops using the duplex channel for the rest of the session.
    pub fn disable(&mut self) {
        if !self.disabled {
            tracing::warn!("duplex channel disabled for this session");
        }
        self.disabled = true;
        self.teardown();
        self.set_state(ConnectionState::Errored);
    }

    /// Ends the current generation: cancels its tasks and drops its sink.
    fn teardown(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;
        self.reconnect_pending = false;
        if let Some(mut sink) = self.sink.take() {
            tokio::spawn(async move {
                let _ = sink.close().await;
            });
        }
    }

    fn start_connect(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let credential = match self.config.auth {
            AuthMode::Query => target.credential.as_deref(),
            AuthMode::Handshake => None,
        };
        let url = match self.config.channel_url(&target.conversation_id, credential) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "cannot build duplex url");
                self.disable();
                return;
            }
        };

        self.set_state(ConnectionState::Connecting);
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        tracing::debug!(generation, conversation_id = %target.conversation_id, "connecting duplex");

        tokio::spawn(async move {
            let signal = tokio::select! {
                _ = cancel.cancelled() => return,
                result = transport.connect(&url) => match result {
                    Ok(duplex) => ChannelSignal::Opened { generation, duplex },
                    Err(error) => ChannelSignal::Failed { generation, error },
                },
            };
            let _ = signals.send(signal);
        });
    }

    /// Applies a signal from a background task.
    ///
    /// Returns the text of an inbound frame from the current channel; every
    /// other signal is consumed here.
    pub async fn handle(&mut self, signal: ChannelSignal) -> Option<String> {
        match signal {
            ChannelSignal::Opened { generation, duplex } if self.is_current(generation) => {
                self.on_opened(duplex).await;
                None
            }
            ChannelSignal::Failed { generation, error } if self.is_current(generation) => {
                tracing::warn!(error = %error, "duplex connect failed");
                self.drop_channel();
                None
            }
            ChannelSignal::Frame { generation, text } if self.is_current(generation) => Some(text),
            ChannelSignal::Closed { generation, code } if self.is_current(generation) => {
                self.on_closed(code);
                None
            }
            ChannelSignal::ReconnectDue { generation }
                if self.is_current(generation) && self.reconnect_pending =>
            {
                self.reconnect_pending = false;
                tracing::info!("reconnecting duplex");
                self.teardown();
                self.start_connect();
                None
            }
            ChannelSignal::KeepAliveDue { generation } if self.is_current(generation) => {
                if self.is_connected() {
                    let _ = self.send_frame(ClientFrame::Ping).await;
                }
                None
            }
            stale => {
                tracing::trace!(signal = ?stale, "dropping stale duplex signal");
                None
            }
        }
    }

    async fn on_opened(&mut self, duplex: Duplex) {
        let Duplex { sink, mut stream } = duplex;
        self.sink = Some(sink);

        let generation = self.generation;
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let inbound = tokio::select! {
                    _ = cancel.cancelled() => return,
                    inbound = stream.recv() => inbound,
                };
                let signal = match inbound {
                    Ok(Inbound::Text(text)) => ChannelSignal::Frame { generation, text },
                    Ok(Inbound::Closed { code }) => ChannelSignal::Closed { generation, code },
                    Err(e) => {
                        tracing::debug!(error = %e, "duplex read failed");
                        ChannelSignal::Closed { generation, code: None }
                    }
                };
                let closed = matches!(signal, ChannelSignal::Closed { .. });
                if signals.send(signal).is_err() || closed {
                    return;
                }
            }
        });

        if let Some(interval) = self.config.keepalive_interval() {
            self.spawn_keepalive(interval);
        }

        let handshake_token = match self.config.auth {
            AuthMode::Handshake => self.target.as_ref().and_then(|t| t.credential.clone()),
            AuthMode::Query => None,
        };
        match handshake_token {
            Some(token) => {
                self.set_state(ConnectionState::Authenticating);
                if let Err(e) = self.write(ClientFrame::auth(token)).await {
                    tracing::warn!(error = %e, "duplex auth frame failed");
                    self.drop_channel();
                }
            }
            None => self.set_state(ConnectionState::Connected),
        }
    }

    fn spawn_keepalive(&self, interval: Duration) {
        let generation = self.generation;
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if signals.send(ChannelSignal::KeepAliveDue { generation }).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn on_closed(&mut self, code: Option<u16>) {
        if code == Some(POLICY_REJECTED_CLOSE_CODE) {
            tracing::warn!(code = POLICY_REJECTED_CLOSE_CODE, "duplex closed by policy, not reconnecting");
            self.teardown();
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        tracing::info!(code = ?code, "duplex closed");
        self.drop_channel();
    }

    /// Ends the current channel after a transport failure and schedules a
    /// reconnect.
    fn drop_channel(&mut self) {
        self.teardown();
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.disabled || self.reconnect_pending || self.target.is_none() {
            return;
        }
        self.reconnect_pending = true;
        let delay = self.config.reconnect_delay();
        let generation = self.generation;
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        tracing::info!(delay_ms = delay.as_millis() as u64, "duplex reconnect scheduled");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(ChannelSignal::ReconnectDue { generation });
                }
            }
        });
    }

    /// The server asked for the credential.
    pub async fn on_auth_challenge(&mut self) {
        let token = self.target.as_ref().and_then(|t| t.credential.clone());
        let Some(token) = token else {
            tracing::warn!("duplex requires authentication but no credential is available");
            self.disable();
            return;
        };
        if self.sink.is_none() {
            return;
        }
        self.set_state(ConnectionState::Authenticating);
        if let Err(e) = self.write(ClientFrame::auth(token)).await {
            tracing::warn!(error = %e, "duplex auth frame failed");
            self.drop_channel();
        }
    }

    /// The server accepted the credential.
    pub fn on_auth_accepted(&mut self) {
        if self.sink.is_some() && self.state() == ConnectionState::Authenticating {
            self.set_state(ConnectionState::Connected);
        }
    }

    /// Sends a frame over a connected channel.
    ///
    /// A write failure tears the channel down and schedules a reconnect.
    pub async fn send_frame(&mut self, frame: ClientFrame) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        match self.write(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "duplex write failed");
                self.drop_channel();
                Err(e)
            }
        }
    }

    async fn write(&mut self, frame: ClientFrame) -> TransportResult<()> {
        let sink = self.sink.as_mut().ok_or(TransportError::ConnectionClosed)?;
        sink.send(frame).await
    }
}
