//! Core error type shared across the service.
//!
//! Route handlers return `Result<T, Error>` and the HTTP layer translates
//! each variant into a status code plus a stable client-facing code (see
//! `server::error`).

use crate::db::models::VideoStatus;
use crate::signer::TokenError;
use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("access denied")]
    AccessDenied,

    #[error("passphrase required")]
    PassphraseRequired,

    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("video is not ready for playback (status: {status})")]
    NotReady { status: VideoStatus },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("token resource does not match the requested path")]
    ResourceMismatch,

    #[error("invalid playlist name: {0}")]
    InvalidPlaylist(String),

    #[error("invalid segment name: {0}")]
    InvalidSegment(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("all renditions failed to encode")]
    AllRenditionsFailed,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a `NotFound` against a named resource kind.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) | Self::InvalidPlaylist(_) | Self::InvalidSegment(_) => 400,
            Self::Unauthorized | Self::PassphraseRequired | Self::InvalidPassphrase => 401,
            Self::AccessDenied | Self::Token(_) | Self::ResourceMismatch => 403,
            Self::NotReady { .. } => 409,
            Self::Storage(StorageError::NotFound { .. }) => 404,
            Self::Storage(_)
            | Self::Probe(_)
            | Self::AllRenditionsFailed
            | Self::Database(_)
            | Self::Internal(_) => 500,
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
