//! Per-request failure taxonomy for the transfer server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::warn;
use thiserror::Error;

/// Failure of one request/response exchange.
///
/// Every variant is local to a single connection; none of them terminates the
/// server or other in-flight transfers.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Token mismatch; rejected before any payload byte is touched.
    #[error("forbidden")]
    Forbidden,
    /// Source vanished between session start and the request.
    #[error("not found")]
    NotFound,
    /// Declared upload name reduced to `.`, `..`, or nothing.
    #[error("invalid filename")]
    InvalidFilename,
    /// Multipart submission contained no file part.
    #[error("no file provided")]
    NoFile,
    /// Body could not be parsed as the declared format.
    #[error("malformed upload: {0}")]
    Malformed(String),
    /// Declared or observed body size exceeds the configured ceiling.
    #[error("file too large")]
    TooLarge,
    /// Mid-stream read/write failure.
    #[error("transfer failed: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            RequestError::Forbidden => StatusCode::FORBIDDEN,
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::InvalidFilename | RequestError::NoFile | RequestError::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            RequestError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        warn!("request failed: {}", self);
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(RequestError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(RequestError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            RequestError::InvalidFilename.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RequestError::NoFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RequestError::TooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
