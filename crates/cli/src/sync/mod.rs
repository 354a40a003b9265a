// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport synchronization for one conversation with the chat service.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  EngineHandle ─►│    Engine    │  (single task, single queue)
//!                 └──────┬───────┘
//!          ┌─────────────┼──────────────┬───────────────┐
//!          ▼             ▼              ▼               ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌─────────────┐
//!   │   Router   │ │ Supervisor │ │ Dispatcher │ │ MessageLog/ │
//!   │            │ │  (duplex)  │ │ (inbound)  │ │  Presence   │
//!   └─────┬──────┘ └─────┬──────┘ └────────────┘ └─────────────┘
//!         ▼              ▼
//!   ┌────────────┐ ┌────────────┐
//!   │  ChatApi   │ │ Transport  │
//!   │  (trait)   │ │  (trait)   │
//!   └────────────┘ └────────────┘
//! ```
//!
//! # Features
//!
//! - Duplex WebSocket channel with fixed-delay reconnect
//! - Per-message fallback to request/response when duplex is not connected
//! - Optimistic log entries reconciled against server confirmations
//! - Counterpart composing indicator with automatic expiry
//! - Injectable transport and API traits for testing

mod api;
mod dispatcher;
mod engine;
mod router;
mod supervisor;
mod transport;

pub use api::{
    ApiError, ApiResult, ChatApi, ConversationSummary, HttpChatApi, SentReply,
    StartedConversation,
};
pub use dispatcher::{is_auth_denial, EventDispatcher, InboundEvent, Notice};
pub use engine::{Engine, EngineHandle, RELOAD_DELAY};
pub use router::{Route, TransportRouter};
pub use supervisor::{ConnectionState, ConnectionSupervisor, ChannelSignal, POLICY_REJECTED_CLOSE_CODE};
pub use transport::{
    Duplex, FrameSink, FrameStream, Inbound, Transport, TransportError, TransportResult,
    WebSocketTransport,
};



#[cfg(test)]
mod engine_tests;
