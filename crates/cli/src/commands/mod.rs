// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

pub mod chat;
pub mod clear;
pub mod list;

use std::sync::Arc;

use crate::config::Config;
use crate::credential::EnvCredential;
use crate::error::Result;
use crate::sync::{Engine, EngineHandle};

/// Starts an engine against the configured service, using `$PARLEY_TOKEN`.
fn start_engine(config: &Config) -> Result<EngineHandle> {
    Engine::connect(config, Arc::new(EnvCredential))
}
