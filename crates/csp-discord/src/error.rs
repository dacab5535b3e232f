//! Error types for the Discord adapter

use thiserror::Error;

/// Errors surfaced by the adapter.
///
/// Transport and API failures from the wrapped client are passed through
/// unchanged in [`DiscordError::Api`]; the adapter does not retry them.
#[derive(Error, Debug)]
pub enum DiscordError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("adapter is not connected")]
    NotConnected,

    #[error("gateway connection failed: {0}")]
    Gateway(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("invalid publish target: {0}")]
    InvalidTarget(String),

    #[error("record has neither msg nor reaction set")]
    EmptyRecord,

    #[error("no recent message to react to in channel {0}")]
    NoRecentMessage(String),

    #[error("Discord API error: {0}")]
    Api(#[from] serenity::Error),
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, DiscordError>;
