//! Error types for the reading feed.

use std::fmt;

use reqwest::StatusCode;
use skywatch_session::SessionError;
use thiserror::Error;

/// Why a single source could not answer a query.
///
/// These are recovered by the resolver, which moves on to the next source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No response was received.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("HTTP error: {status}")]
    Http { status: StatusCode },

    /// The body could not be read as the expected shape.
    #[error("malformed body: {0}")]
    Parse(String),

    /// The source does not serve this kind of query.
    #[error("unsupported query: {0}")]
    Unsupported(String),

    /// The request was rejected as unauthorized; the session has already
    /// been invalidated.
    #[error("session expired")]
    SessionExpired,

    /// Any other session-layer failure.
    #[error("session error: {0}")]
    Session(SessionError),
}

impl From<SessionError> for SourceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionExpired => SourceError::SessionExpired,
            SessionError::Network(e) => SourceError::Network(e),
            other => SourceError::Session(other),
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

/// A failed attempt recorded during resolution.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_name: String,
    pub error: SourceError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source_name, self.error)
    }
}

/// Errors surfaced by the feed to its consumers.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Every configured source failed.
    #[error("all sources exhausted ({})", join_failures(.failures))]
    AllSourcesExhausted { failures: Vec<SourceFailure> },

    /// A poll configuration outside the offered options.
    #[error("invalid poll configuration: {0}")]
    InvalidConfig(String),

    /// A prediction requested for a day outside the forecast range.
    #[error("prediction day {day} out of range, expected 1 to 5")]
    InvalidPredictionDay { day: u8 },

    /// Timestamps and values of different lengths.
    #[error("misaligned series: {timestamps} timestamps, {values} values")]
    MisalignedSeries { timestamps: usize, values: usize },
}

fn join_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
