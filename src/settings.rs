use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/chat";
pub const DEFAULT_STORAGE_KEY: &str = "myfuturedrive_copilot_v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TRANSCRIPT_ROWS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SettingsLayer {
    pub api_url: Option<String>,
    pub database_url: Option<String>,
    pub storage_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub transcript_rows: Option<usize>,
}

impl SettingsLayer {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let parse_u64 = |var: &'static str| -> Result<Option<u64>, SettingsError> {
            lookup(var)
                .map(|value| value.trim().parse().map_err(|_| SettingsError::InvalidEnv { var, value }))
                .transpose()
        };
        Ok(Self {
            api_url: lookup("COPILOT_API_URL"),
            database_url: lookup("COPILOT_DATABASE_URL"),
            storage_key: lookup("COPILOT_STORAGE_KEY"),
            timeout_secs: parse_u64("COPILOT_TIMEOUT_SECS")?,
            transcript_rows: parse_u64("COPILOT_TRANSCRIPT_ROWS")?.map(|n| n as usize),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub database_url: Option<String>,
    pub storage_key: String,
    pub timeout_secs: u64,
    pub transcript_rows: usize,
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// CLI flags win over the environment, which wins over built-in defaults.
pub fn resolve_client_settings(cli: &SettingsLayer, env: &SettingsLayer) -> Result<ClientSettings, SettingsError> {
    let api_url = cli
        .api_url
        .clone()
        .or_else(|| env.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.into());
    validate_api_url(&api_url)?;

    Ok(ClientSettings {
        api_url,
        database_url: cli.database_url.clone().or_else(|| env.database_url.clone()),
        storage_key: cli
            .storage_key
            .clone()
            .or_else(|| env.storage_key.clone())
            .unwrap_or_else(|| DEFAULT_STORAGE_KEY.into()),
        timeout_secs: cli.timeout_secs.or(env.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
        transcript_rows: cli
            .transcript_rows
            .or(env.transcript_rows)
            .unwrap_or(DEFAULT_TRANSCRIPT_ROWS),
    })
}

fn validate_api_url(raw: &str) -> Result<(), SettingsError> {
    let parsed = url::Url::parse(raw).map_err(|source| SettingsError::InvalidUrl { url: raw.to_string(), source })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SettingsError::UnsupportedScheme(other.to_string())),
    }
}
