// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive chat session.
//!
//! Input lines are either slash commands or messages. A separate task
//! prints transcript updates, connection changes, presence and notices as
//! the engine publishes them.

use std::collections::HashSet;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use parley_core::message::{Message, MessageId, Sender};

use crate::config::Config;
use crate::error::Result;
use crate::sync::EngineHandle;

use super::{list, start_engine};

const COMMANDS_HINT: &str = "commands: /new, /open <id>, /list, /clear, /quit";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Send(String),
    New,
    Open(String),
    List,
    Clear,
    Quit,
    Empty,
    /// A slash command that is unknown or missing its argument.
    Invalid(String),
}

pub(crate) fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    match (name, arg) {
        ("new", None) => Input::New,
        ("open", Some(id)) => Input::Open(id.to_string()),
        ("list", None) => Input::List,
        ("clear", None) => Input::Clear,
        ("quit" | "exit", None) => Input::Quit,
        _ => Input::Invalid(line.to_string()),
    }
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Counterpart => "them",
        Sender::System => "--",
    }
}

pub(crate) fn format_message(message: &Message) -> String {
    format!(
        "{} {:>4}: {}",
        message.created_at.format("%H:%M"),
        sender_label(message.sender),
        message.content
    )
}

/// Tracks which log entries have been printed.
///
/// Only settled entries are printed; an unconfirmed entry is printed once
/// its confirmation arrives.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    printed: HashSet<MessageId>,
}

impl Transcript {
    /// Returns lines for entries not printed yet.
    pub(crate) fn fresh(&mut self, messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| !m.is_pending())
            .filter(|m| self.printed.insert(m.id.clone()))
            .map(format_message)
            .collect()
    }

    pub(crate) fn reset(&mut self) {
        self.printed.clear();
    }
}

async fn print_updates(handle: EngineHandle) {
    let mut messages = handle.subscribe_messages();
    let mut connection = handle.subscribe_connection_state();
    let mut presence = handle.subscribe_presence();
    let mut conversation = handle.subscribe_conversation();
    let mut notices = handle.subscribe_notices();
    let mut transcript = Transcript::default();

    for line in transcript.fresh(&messages.borrow_and_update()) {
        println!("{}", line);
    }

    loop {
        tokio::select! {
            changed = messages.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = messages.borrow_and_update().clone();
                for line in transcript.fresh(&snapshot) {
                    println!("{}", line);
                }
            }
            changed = conversation.changed() => {
                if changed.is_err() {
                    return;
                }
                transcript.reset();
                match conversation.borrow_and_update().as_deref() {
                    Some(id) => println!("* conversation {}", id),
                    None => println!("* no conversation"),
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *connection.borrow_and_update();
                println!("* live channel {}", state);
            }
            changed = presence.changed() => {
                if changed.is_err() {
                    return;
                }
                if presence.borrow_and_update().active {
                    println!("* typing...");
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => println!("! {}", notice),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "notices lagged"),
                Err(RecvError::Closed) => return,
            },
        }
    }
}

async fn handle_input(handle: &EngineHandle, input: Input) -> Result<bool> {
    match input {
        Input::Quit => return Ok(false),
        Input::Empty => {}
        Input::Send(text) => {
            handle.send_message(text).await?;
        }
        Input::New => {
            handle.start_new_conversation().await?;
        }
        Input::Open(id) => handle.select_conversation(id).await?,
        Input::List => list::print(handle).await?,
        Input::Clear => {
            handle.clear_all_conversations().await?;
            println!("Cleared all conversations");
        }
        Input::Invalid(line) => eprintln!("unknown command {:?} ({})", line, COMMANDS_HINT),
    }
    Ok(true)
}

pub async fn run(config: &Config, conversation: Option<String>) -> Result<()> {
    let handle = start_engine(config)?;
    if let Some(id) = conversation {
        if let Err(e) = handle.select_conversation(id).await {
            handle.shutdown().await;
            return Err(e);
        }
    }

    let printer = tokio::spawn(print_updates(handle.clone()));
    println!("{}", COMMANDS_HINT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        match handle_input(&handle, parse_input(&line)).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            // Reported and kept going; the engine already rolled back.
            Err(e) => eprintln!("error: {}", e),
        }
    };

    handle.shutdown().await;
    printer.abort();
    result
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
