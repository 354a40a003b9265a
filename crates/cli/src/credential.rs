// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Credential providers.
//!
//! The engine never stores credentials; it asks a provider each time it
//! opens a channel or makes a request.

use crate::env;

/// Source of the bearer credential.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current credential, or `None` when signed out.
    fn credential(&self) -> Option<String>;
}

/// A fixed credential.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredential(Some(token.into()))
    }

    pub fn none() -> Self {
        StaticCredential(None)
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads `$PARLEY_TOKEN` on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredential;

impl CredentialProvider for EnvCredential {
    fn credential(&self) -> Option<String> {
        env::token()
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
