//! Error types for the session layer.

use thiserror::Error;

/// Errors from the key-value storage tiers.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while managing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server rejected the credentials, or answered without a token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An authenticated request came back unauthorized.
    #[error("session expired")]
    SessionExpired,

    /// No response was received.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// Reading or writing a storage tier failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Message suitable for showing next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::AuthenticationFailed(message) => message.clone(),
            _ => crate::GENERIC_AUTH_FAILURE.to_string(),
        }
    }
}
