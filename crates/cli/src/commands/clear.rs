// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::Config;
use crate::error::Result;

use super::start_engine;

pub async fn run(config: &Config) -> Result<()> {
    let handle = start_engine(config)?;
    let result = handle.clear_all_conversations().await;
    handle.shutdown().await;
    result?;
    println!("Cleared all conversations");
    Ok(())
}
