// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! parley - terminal client and synchronization engine for a chat service.
//!
//! The engine keeps one conversation in sync over two transports: a duplex
//! WebSocket channel when it is connected, and plain HTTP requests
//! otherwise. Outgoing messages show up in the log at once and are
//! reconciled when the server confirms them.
//!
//! # Main Components
//!
//! - [`sync::Engine`] / [`sync::EngineHandle`] - the engine task and its handle
//! - [`Config`] - service endpoints and timing, loaded from TOML
//! - [`credential`] - where the bearer credential comes from
//! - [`Error`] - error types for all operations
//!
//! # Embedding
//!
//! ```rust,ignore
//! use parley::{credential::EnvCredential, sync::Engine, Config};
//!
//! let config = Config::load_or_default(None)?;
//! let engine = Engine::connect(&config, Arc::new(EnvCredential))?;
//! let mut messages = engine.subscribe_messages();
//! engine.send_message("hello").await?;
//! ```

mod cli;
mod commands;

pub mod config;
pub mod credential;
pub mod env;
pub mod error;
pub mod sync;

pub use cli::{Cli, Command};
pub use config::Config;
pub use error::{Error, Result};

use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is not set.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `--verbose`.
fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Execute a CLI invocation. This is the main entry point for library users
/// and provides a testable way to run commands without process execution.
pub fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose);
    let config = Config::load_or_default(cli.config.as_deref())?;
    tracing::debug!(api = %config.api.base_url, duplex = config.duplex.enabled, "config loaded");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Command::Chat { conversation } => commands::chat::run(&config, conversation).await,
            Command::List => commands::list::run(&config).await,
            Command::Clear => commands::clear::run(&config).await,
        }
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
