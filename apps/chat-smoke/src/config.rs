//! Environment-backed runtime configuration for `chat-smoke`.

use std::{env, time::Duration};

use thiserror::Error;

const DEFAULT_ROOM: &str = "smoke-room";
const DEFAULT_CLIENT_ID: &str = "smoke-client";
const DEFAULT_TYPING_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MESSAGE_TEXT: &str = "hello from chat-smoke";

/// Runtime configuration used by the smoke run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Room the smoke run joins.
    pub room: String,
    /// Client id the in-memory transport is configured with.
    pub client_id: String,
    /// Typing idle window.
    pub typing_timeout: Duration,
    /// Text of the message sent during the run.
    pub message_text: String,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let room = optional_trimmed_env("CHAT_ROOM", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ROOM.to_owned());
        let client_id = optional_trimmed_env("CHAT_CLIENT_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_owned());
        let typing_timeout_ms =
            parse_optional_u64("CHAT_TYPING_TIMEOUT_MS", &mut lookup)?.unwrap_or(DEFAULT_TYPING_TIMEOUT_MS);
        let message_text = optional_trimmed_env("CHAT_MESSAGE_TEXT", &mut lookup)
            .unwrap_or_else(|| DEFAULT_MESSAGE_TEXT.to_owned());

        if typing_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_TYPING_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if room.contains("::") {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_ROOM",
                value: room,
                reason: "must not contain '::'".to_owned(),
            });
        }

        Ok(Self {
            room,
            client_id,
            typing_timeout: Duration::from_millis(typing_timeout_ms),
            message_text,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
