// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is read from a TOML file. Lookup order:
//! 1. `--config <path>`
//! 2. `$PARLEY_CONFIG`
//! 3. `<config dir>/parley/config.toml`
//! 4. Built-in defaults
//!
//! Every field has a default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::env;
use crate::error::{Error, Result};

const CONFIG_DIR_NAME: &str = "parley";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub duplex: DuplexConfig,
    /// How long the counterpart's composing indicator stays on (default: 10000).
    #[serde(default = "default_presence_timeout_ms")]
    pub presence_timeout_ms: u64,
}

/// Request/response endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the chat API (default: "http://localhost:8000").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// How the credential reaches the duplex endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Appended to the URL as `?token=`.
    #[default]
    Query,
    /// Sent in an `auth` frame right after the channel opens.
    Handshake,
}

/// Duplex channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplexConfig {
    /// When false, every message goes over request/response (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path prefix; the conversation id is appended (default: "/chat/ws").
    #[serde(default = "default_duplex_path")]
    pub path: String,
    #[serde(default)]
    pub auth: AuthMode,
    /// Fixed delay before a reconnect attempt (default: 3000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Ping interval while connected. 0 = disabled.
    #[serde(default)]
    pub keepalive_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_scheme() -> String {
    "ws".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    10400
}

fn default_duplex_path() -> String {
    "/chat/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_presence_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DuplexConfig {
    fn default() -> Self {
        DuplexConfig {
            enabled: true,
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            path: default_duplex_path(),
            auth: AuthMode::default(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            keepalive_interval_ms: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: ApiConfig::default(),
            duplex: DuplexConfig::default(),
            presence_timeout_ms: default_presence_timeout_ms(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DuplexConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Returns the keepalive interval, or `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    /// Builds the channel URL for a conversation.
    ///
    /// In [`AuthMode::Query`] the credential, if any, is added as `token`.
    pub fn channel_url(&self, conversation_id: &str, credential: Option<&str>) -> Result<String> {
        let base = format!("{}://{}:{}", self.scheme, self.host, self.port);
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("invalid duplex endpoint '{}': {}", base, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Config(format!("duplex endpoint '{}' cannot be a base", base)))?;
            segments.clear();
            segments.extend(self.path.split('/').filter(|s| !s.is_empty()));
            segments.push(conversation_id);
        }
        if let (AuthMode::Query, Some(token)) = (self.auth, credential) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.into())
    }
}

impl Config {
    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Saves configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Resolves and loads configuration, then applies environment overrides.
    ///
    /// An explicitly named file (flag or `$PARLEY_CONFIG`) must exist; the
    /// per-user default file is optional.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_path(explicit, env::config_path(), default_path()) {
            Some(ConfigSource::Required(path)) => Self::load(&path)?,
            Some(ConfigSource::Optional(path)) if path.is_file() => Self::load(&path)?,
            _ => Self::default(),
        };
        if let Some(base) = env::api_base() {
            config.api.base_url = base;
        }
        Ok(config)
    }
}

/// Where a configuration file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by the user; missing is an error.
    Required(PathBuf),
    /// Per-user default location; missing means defaults.
    Optional(PathBuf),
}

/// Picks the configuration file by precedence.
pub fn resolve_path(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    default: Option<PathBuf>,
) -> Option<ConfigSource> {
    explicit
        .map(Path::to_path_buf)
        .or(from_env)
        .map(ConfigSource::Required)
        .or_else(|| default.map(ConfigSource::Optional))
}

/// Per-user configuration file location.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
