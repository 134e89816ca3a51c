use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no active session")]
    NoActiveSession,

    #[error("failed to encode store state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist store state: {0}")]
    Persist(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("assistant endpoint returned {0}")]
    Status(reqwest::StatusCode),

    #[error("assistant response is not JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("assistant response is not an object")]
    Shape,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid assistant url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported assistant url scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
