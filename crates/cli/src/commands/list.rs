// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::Config;
use crate::error::Result;
use crate::sync::{ConversationSummary, EngineHandle};

use super::start_engine;

const UNTITLED: &str = "(untitled)";

/// One line per conversation: id, creation time, topic.
pub(crate) fn format_summary(summary: &ConversationSummary) -> String {
    let created = summary
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let topic = summary
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);
    format!("{}  {:<16}  {}", summary.id, created, topic)
}

/// Prints the conversation list.
pub(crate) async fn print(handle: &EngineHandle) -> Result<()> {
    let conversations = handle.list_conversations().await?;
    if conversations.is_empty() {
        println!("No conversations");
        return Ok(());
    }
    for summary in &conversations {
        println!("{}", format_summary(summary));
    }
    Ok(())
}

pub async fn run(config: &Config) -> Result<()> {
    let handle = start_engine(config)?;
    let result = print(&handle).await;
    handle.shutdown().await;
    result
}

#[cfg(test)]
#[path = "list_tests.rs"]
mod tests;
