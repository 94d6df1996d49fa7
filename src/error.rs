//! Error types for a synchronisation run.
//!
//! [`SyncError`] covers everything that aborts a run: failed token exchange,
//! failed reads from Azure DevOps and records that cannot be mapped.
//! [`UpsertError`] is kept separate because a rejected catalog write is
//! reported and the run carries on.

use thiserror::Error;

/// Errors that abort a synchronisation run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog authentication failed: {0}")]
    Auth(String),

    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("cannot map {kind} record: {message}")]
    Mapping { kind: &'static str, message: String },
}

impl SyncError {
    pub fn mapping(kind: &'static str, err: impl std::fmt::Display) -> Self {
        SyncError::Mapping {
            kind,
            message: err.to_string(),
        }
    }
}

/// A catalog write that did not go through.
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("catalog rejected entity with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
