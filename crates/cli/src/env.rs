// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access.
//!
//! All runtime environment variables used by parley are defined here
//! with typed accessor functions. The variable name constants are generated
//! by `build.rs` and live in the [`vars`] submodule.

use std::path::PathBuf;

/// Generated environment variable name constants.
pub mod vars {
    include!(concat!(env!("OUT_DIR"), "/env_vars.rs"));
}

/// Returns the value of `PARLEY_CONFIG` if set.
pub fn config_path() -> Option<PathBuf> {
    std::env::var(vars::PARLEY_CONFIG).ok().map(PathBuf::from)
}

/// Returns the value of `PARLEY_TOKEN` if set and non-empty.
pub fn token() -> Option<String> {
    std::env::var(vars::PARLEY_TOKEN)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Returns the value of `PARLEY_API_BASE` if set and non-empty.
pub fn api_base() -> Option<String> {
    std::env::var(vars::PARLEY_API_BASE)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
