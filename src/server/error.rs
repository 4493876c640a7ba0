//! Uniform error translation: every failure a handler surfaces converts to
//! an HTTP status plus a `{"detail": ...}` JSON body in exactly one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::encoding::EncodeError;
use crate::source::SourceError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter(_) | ApiError::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Source(SourceError::NotFound(_)) => StatusCode::NOT_FOUND,
            // An out-of-range band index is the caller's mistake
            ApiError::Source(SourceError::BandIndex(_)) => StatusCode::BAD_REQUEST,
            ApiError::Source(SourceError::Timeout) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Source(_) => StatusCode::BAD_GATEWAY,
            ApiError::Encode(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            log::error!("request failed: {detail}");
        } else {
            log::debug!("request rejected: {detail}");
        }
        (status, Json(ErrorBody { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::MissingParameter("url").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Source(SourceError::NotFound("a.tif".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Source(SourceError::BandIndex(9)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Source(SourceError::Fetch("timeout".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Encode(EncodeError::BandCount(3)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_error_is_generic() {
        assert_eq!(ApiError::Internal.to_string(), "internal server error");
    }
}
