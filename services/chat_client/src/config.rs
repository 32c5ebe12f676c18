//! services/chat_client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chat_sync_core::session::{SendMode, DEFAULT_HISTORY_LIMIT};
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub send_mode: SendMode,
    pub state_path: PathBuf,
    pub history_limit: u32,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server ---
        let api_base_url = lookup("CHAT_API_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        if api_base_url.is_empty() {
            return Err(ConfigError::MissingVar("CHAT_API_BASE_URL".to_string()));
        }

        let send_mode = match lookup("CHAT_STREAMING") {
            None => SendMode::Streaming,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => SendMode::Streaming,
                "0" | "false" | "no" | "off" => SendMode::Buffered,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CHAT_STREAMING".to_string(),
                        format!("'{}' is not a boolean", value),
                    ))
                }
            },
        };

        let history_limit = match lookup("CHAT_HISTORY_LIMIT") {
            None => DEFAULT_HISTORY_LIMIT,
            Some(value) => value.trim().parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("CHAT_HISTORY_LIMIT".to_string(), e.to_string())
            })?,
        };

        // --- Local state ---
        let state_path = lookup("CHAT_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.chat_state.json"));

        // --- Logging ---
        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_base_url,
            send_mode,
            state_path,
            history_limit,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.send_mode, SendMode::Streaming);
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.state_path, PathBuf::from("./.chat_state.json"));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn reads_overrides_and_trims_base_url() {
        let config = load(&[
            ("CHAT_API_BASE_URL", "https://chat.example.com/"),
            ("CHAT_STREAMING", "off"),
            ("CHAT_HISTORY_LIMIT", "25"),
            ("CHAT_STATE_PATH", "/tmp/state.json"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();
        assert_eq!(config.api_base_url, "https://chat.example.com");
        assert_eq!(config.send_mode, SendMode::Buffered);
        assert_eq!(config.history_limit, 25);
        assert_eq!(config.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            load(&[("CHAT_API_BASE_URL", "/")]),
            Err(ConfigError::MissingVar(var)) if var == "CHAT_API_BASE_URL"
        ));
        assert!(matches!(
            load(&[("CHAT_STREAMING", "maybe")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "CHAT_STREAMING"
        ));
        assert!(matches!(
            load(&[("CHAT_HISTORY_LIMIT", "-1")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "CHAT_HISTORY_LIMIT"
        ));
        assert!(matches!(
            load(&[("RUST_LOG", "loud")]),
            Err(ConfigError::InvalidValue(var, _)) if var == "RUST_LOG"
        ));
    }
}
