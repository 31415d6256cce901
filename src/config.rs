// src/config.rs
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Client settings, read from the environment (and `.env` when present)
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub socket_url: String,
    pub session_file: PathBuf,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = required_url(&lookup, "CONECTA_API_URL", &["http", "https"])?;
        let socket_url = required_url(&lookup, "CONECTA_SOCKET_URL", &["ws", "wss"])?;
        let session_file = lookup("CONECTA_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("session.json"));

        Ok(Self {
            api_url,
            socket_url,
            session_file,
            connect_timeout: seconds(&lookup, "CONECTA_CONNECT_TIMEOUT_SECS", 10)?,
            ack_timeout: seconds(&lookup, "CONECTA_ACK_TIMEOUT_SECS", 10)?,
            request_timeout: seconds(&lookup, "CONECTA_REQUEST_TIMEOUT_SECS", 15)?,
        })
    }
}

fn required_url<F>(lookup: &F, key: &'static str, schemes: &[&str]) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or(ConfigError::Missing(key))?;
    match Url::parse(&value) {
        Ok(url) if schemes.iter().any(|scheme| *scheme == url.scheme()) => Ok(value),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigError::Invalid { key, value }),
    }
}
