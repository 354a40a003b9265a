// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::sync::{ApiError, TransportError};

/// All possible errors that can occur in the parley library.
///
/// Errors provide user-friendly messages with hints for common issues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplex channel unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),

    #[error("authentication rejected: {0}\n  hint: continuing over request/response only")]
    AuthenticationRejected(String),

    #[error("conversation {0} is no longer available")]
    RemoteConversationInvalid(String),

    #[error("malformed inbound frame: {0}")]
    MalformedInboundFrame(String),

    #[error("failed to send message: {0}")]
    SendFailed(#[source] ApiError),

    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("engine has stopped")]
    EngineStopped,

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// A specialized Result type for parley operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
