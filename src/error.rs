//! Error types for folklore.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail archive transport errors (the query tool and the single-message fetch).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Archive query '{query}' failed: {reason}")]
    QueryFailed { query: String, reason: String },

    #[error("Fetching message {message_id} failed: {reason}")]
    FetchFailed { message_id: String, reason: String },

    #[error("Malformed archive response: {0}")]
    Malformed(String),
}

/// Chat-surface errors for post/edit/react calls.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Notification {notification} not found in channel {channel}")]
    NotFound {
        channel: String,
        notification: String,
    },

    #[error("Rate limited on channel {channel}, retry after {retry_after:?}")]
    RateLimited {
        channel: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Lifecycle-tracking errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Collaborator unreachable or returned garbage. Retried at the next tick.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Merge confirmation whose refs match no tracked pull request.
    #[error("Merge confirmation {confirmation_id} references no tracked pull request (refs: {refs:?})")]
    Linkage {
        confirmation_id: String,
        refs: Vec<String>,
    },

    /// A single unusable message (bad date, malformed body).
    #[error("Unparseable message {message_id}: {reason}")]
    Parse { message_id: String, reason: String },

    /// Store write/read failure. Fatal for the current cycle.
    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Result type alias for folklore.
pub type Result<T> = std::result::Result<T, Error>;
