//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for the core error type so route handlers
//! can return `Result<T, Error>` directly. Internally errors stay a closed
//! sum type; the stable string codes exist only at this boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;
use crate::signer::TokenError;
use crate::storage::StorageError;

/// Wrapper so we can implement `IntoResponse` for the library error type.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// Stable code surfaced to clients alongside the message.
fn client_code(error: &Error) -> &'static str {
    match error {
        Error::NotFound { resource, .. } if *resource == "video" => "VIDEO_NOT_FOUND",
        Error::NotFound { .. } => "NOT_FOUND",
        Error::Validation(_) => "VALIDATION_ERROR",
        Error::Unauthorized => "UNAUTHORIZED",
        Error::AccessDenied => "ACCESS_DENIED",
        Error::PassphraseRequired => "PASSPHRASE_REQUIRED",
        Error::InvalidPassphrase => "INVALID_PASSPHRASE",
        Error::NotReady { .. } => "VIDEO_NOT_READY",
        Error::Token(TokenError::Expired) => "TOKEN_EXPIRED",
        Error::Token(_) => "INVALID_SIGNATURE",
        Error::ResourceMismatch => "RESOURCE_MISMATCH",
        Error::InvalidPlaylist(_) => "INVALID_PLAYLIST",
        Error::InvalidSegment(_) => "INVALID_SEGMENT",
        Error::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
        Error::Storage(_) => "STORAGE_ERROR",
        Error::Probe(_) | Error::AllRenditionsFailed => "PROCESSING_ERROR",
        Error::Database(_) | Error::Internal(_) => "INTERNAL_ERROR",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "server error in API handler");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": client_code(&self.0),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_not_found_maps_to_code_and_404() {
        let err = ApiError(Error::not_found("video", "abc"));
        assert_eq!(client_code(&err.0), "VIDEO_NOT_FOUND");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn passphrase_required_is_distinguishable() {
        assert_eq!(client_code(&Error::PassphraseRequired), "PASSPHRASE_REQUIRED");
        assert_eq!(client_code(&Error::InvalidPassphrase), "INVALID_PASSPHRASE");
        assert_eq!(
            ApiError(Error::PassphraseRequired).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn token_errors_map_to_403_with_codes() {
        assert_eq!(
            client_code(&Error::Token(TokenError::BadSignature)),
            "INVALID_SIGNATURE"
        );
        assert_eq!(
            client_code(&Error::Token(TokenError::Malformed)),
            "INVALID_SIGNATURE"
        );
        assert_eq!(client_code(&Error::Token(TokenError::Expired)), "TOKEN_EXPIRED");
        assert_eq!(client_code(&Error::ResourceMismatch), "RESOURCE_MISMATCH");
        assert_eq!(
            ApiError(Error::ResourceMismatch).into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn not_ready_carries_conflict_status() {
        let err = Error::NotReady {
            status: crate::db::models::VideoStatus::Processing,
        };
        assert_eq!(client_code(&err), "VIDEO_NOT_READY");
        assert_eq!(ApiError(err).into_response().status(), StatusCode::CONFLICT);
    }
}
