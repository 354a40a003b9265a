// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! parley-core: Shared library for the parley chat client
//!
//! This crate provides the message model, duplex wire frames, the
//! conversation log and the presence state machine. It has no async runtime
//! dependency; timers and I/O live in the `parley` crate.

pub mod error;
pub mod log;
pub mod message;
pub mod presence;
pub mod protocol;

pub use error::{Error, Result};
pub use log::{MessageLog, Reconciled};
pub use message::{Message, MessageId, PendingId, Sender, WireMessage};
pub use presence::{Countdown, Presence, PresenceSignal, DEFAULT_PRESENCE_TIMEOUT};
pub use protocol::{ClientFrame, ServerFrame};
