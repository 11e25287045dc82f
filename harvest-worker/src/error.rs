use harvest_common::loader::TransportError;
use harvest_common::params::InvalidParameter;
use harvest_common::redis::RedisError;
use harvest_common::search::DecodeError;
use thiserror::Error;

/// Why a cycle stopped before accounting for its page.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("failed to fetch search page: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to decode search page: {0}")]
    Decode(#[from] DecodeError),
    #[error("seen emails store failed: {0}")]
    Store(#[from] RedisError),
    #[error("cycle task panicked: {0}")]
    Panicked(String),
}

impl CycleError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Transport(_) => "transport",
            CycleError::Decode(_) => "decode",
            CycleError::Store(_) => "store",
            CycleError::Panicked(_) => "panic",
        }
    }
}

/// Enumeration of errors raised while loading the worker's configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("one of YOUTUBE_API_KEY or YOUTUBE_API_KEY_FILE must be set to a non-empty key")]
    MissingApiKey,
    #[error("failed to read api key file {path}: {error}")]
    ApiKeyFile {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("CYCLE_INTERVAL_SECS must be at least 1")]
    ZeroCycleInterval,
    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),
}
