// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

const QUICKSTART_HELP: &str = "\
Get started:
  parley chat                     Start chatting (a conversation is created on first message)
  parley chat -c <id>             Continue an existing conversation
  parley list                     List conversations
  parley clear                    Delete all conversations

Environment:
  PARLEY_TOKEN      Bearer credential for the chat service
  PARLEY_API_BASE   Overrides api.base_url
  PARLEY_CONFIG     Config file path";

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Terminal client for the chat service")]
#[command(
    long_about = "Terminal client for the chat service.\n\n\
    Messages go over a live WebSocket channel when one is connected and over plain \
    HTTP requests otherwise."
)]
#[command(after_help = QUICKSTART_HELP)]
pub struct Cli {
    /// Read configuration from <path>
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Chat interactively
    #[command(after_help = "\
Commands inside the chat:
  /new          Start a new conversation
  /open <id>    Switch to an existing conversation
  /list         List conversations
  /clear        Delete all conversations
  /quit         Leave")]
    Chat {
        /// Conversation to open on start
        #[arg(long, short, value_parser = non_empty_string)]
        conversation: Option<String>,
    },

    /// List conversations
    List,

    /// Delete all conversations
    Clear,
}

#[cfg(test)]
#[path = "../cli_tests/mod.rs"]
mod tests;
