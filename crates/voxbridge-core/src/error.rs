//! Error types for the voxbridge core

use std::time::Duration;
use thiserror::Error;

/// Result type alias for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures reported by the primary or secondary response provider.
///
/// None of these reach the caller of `ResponseResolver::resolve`; they select the
/// fallback path and end up in the logs.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider message: {0}")]
    MalformedMessage(String),

    #[error("provider channel closed before a response arrived")]
    ChannelClosed,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::MalformedMessage(err.to_string())
    }
}

/// Errors from configuration, storage and serialization.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transcript store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
