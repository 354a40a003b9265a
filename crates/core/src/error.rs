// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for parley-core operations.

use thiserror::Error;

/// All possible errors that can occur in parley-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sender: '{0}'\n  hint: valid senders are: user, bot, system")]
    InvalidSender(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for parley-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
