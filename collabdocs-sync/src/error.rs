//! Error types.
//!
//! Transport, codec and replica errors are absorbed inside the session
//! (reconnect, drop the frame). Only [`SessionError`] and [`ApiError`]
//! reach the caller, and their `Display` text is meant for the user.

use thiserror::Error;

/// Connection establishment failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection refused")]
    Refused,
}

/// Inbound frame could not be turned into a [`crate::protocol::Message`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid snapshot encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("snapshot carries no data")]
    EmptySnapshot,
}

/// Delta or snapshot bytes the replica could not decode.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("undecodable update: {0}")]
    Decode(String),
    #[error("update could not be integrated: {0}")]
    Apply(String),
}

/// REST collaborator failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{status}: {message} ({code})")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Conditions the caller must show to the user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Enter your name before commenting")]
    MissingIdentity,
    #[error("Select some text to comment")]
    EmptySelection,
    #[error("Comment text is empty")]
    EmptyComment,
    #[error("Failed to add comment")]
    AddComment(#[source] ApiError),
    #[error("Failed to resolve comment")]
    ResolveComment(#[source] ApiError),
    #[error("Failed to load comments")]
    LoadComments(#[source] ApiError),
    #[error("Session is closed")]
    Closed,
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid url ({value}): {source}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Client-local preference storage failures.
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("preference file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}
